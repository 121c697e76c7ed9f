// Thorium API 数据类型定义

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// 单个文件的上传请求
///
/// 创建任务时构建一次并原样保存，重试时直接复用，不会根据当前表单状态重新生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRequest {
    /// 本地文件路径
    pub path: PathBuf,
    /// 上传时使用的文件名
    pub file_name: String,
    /// 所属分组（至少一个）
    pub groups: Vec<String>,
    /// 描述
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 标签（key -> values），使用有序集合保证表单字段顺序稳定
    #[serde(default)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
    /// 来源信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    /// 触发深度
    #[serde(default)]
    pub trigger_depth: u8,
}

impl SampleRequest {
    /// 生成 multipart 表单中的文本字段（不含文件数据）
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        if let Some(description) = &self.description {
            fields.push(("description".to_string(), description.clone()));
        }
        for group in &self.groups {
            fields.push(("groups".to_string(), group.clone()));
        }
        for (key, values) in &self.tags {
            let tag_key = format!("tags[{}]", key);
            for value in values {
                fields.push((tag_key.clone(), value.clone()));
            }
        }
        if let Some(origin) = &self.origin {
            fields.extend(origin.form_fields());
        }
        fields.push(("trigger_depth".to_string(), self.trigger_depth.to_string()));
        fields
    }
}

/// 抓包协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcapNetworkProtocol {
    #[serde(rename = "TCP", alias = "Tcp", alias = "tcp")]
    Tcp,
    #[serde(rename = "UDP", alias = "Udp", alias = "udp")]
    Udp,
}

impl fmt::Display for PcapNetworkProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PcapNetworkProtocol::Tcp => write!(f, "TCP"),
            PcapNetworkProtocol::Udp => write!(f, "UDP"),
        }
    }
}

impl FromStr for PcapNetworkProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TCP" | "Tcp" | "tcp" => Ok(PcapNetworkProtocol::Tcp),
            "UDP" | "Udp" | "udp" => Ok(PcapNetworkProtocol::Udp),
            _ => Err(format!("无效的网络协议 '{}'，仅支持 TCP 或 UDP", s)),
        }
    }
}

/// 切分来源的具体类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CarvedOrigin {
    /// 从抓包文件中切分
    Pcap {
        src_ip: Option<IpAddr>,
        dest_ip: Option<IpAddr>,
        src_port: Option<u16>,
        dest_port: Option<u16>,
        proto: Option<PcapNetworkProtocol>,
        url: Option<String>,
    },
    /// 从未知类型的文件中切分
    Unknown,
}

/// 样本来源描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Origin {
    /// 从外部网站下载
    Downloaded { url: String, name: Option<String> },
    /// 由其他样本变换得到
    Transformed {
        parent: String,
        tool: Option<String>,
        flags: Vec<String>,
        cmd: Option<String>,
    },
    /// 从其他样本解包得到
    Unpacked {
        parent: String,
        tool: Option<String>,
        flags: Vec<String>,
    },
    /// 从其他样本静态切分得到
    Carved {
        parent: String,
        tool: Option<String>,
        carved: CarvedOrigin,
    },
    /// 来自嗅探器
    Wire {
        sniffer: String,
        source: Option<String>,
        destination: Option<String>,
    },
    /// 来自安全事件
    Incident {
        incident: String,
        cover_term: Option<String>,
        mission_team: Option<String>,
        network: Option<String>,
        machine: Option<String>,
        location: Option<String>,
    },
    /// 运行父样本时的内存转储
    MemoryDump {
        parent: String,
        memory_type: Option<String>,
        reconstructed: Vec<String>,
        base_addr: Option<String>,
    },
}

/// 向字段列表追加一个可选文本字段
fn push_opt(fields: &mut Vec<(String, String)>, key: &str, value: &Option<String>) {
    if let Some(value) = value {
        fields.push((key.to_string(), value.clone()));
    }
}

/// 向字段列表追加一个列表字段（同名字段重复出现）
fn push_list(fields: &mut Vec<(String, String)>, key: &str, values: &[String]) {
    for value in values {
        fields.push((key.to_string(), value.clone()));
    }
}

impl Origin {
    /// 服务端使用的来源类型名
    pub fn origin_type(&self) -> &'static str {
        match self {
            Origin::Downloaded { .. } => "Downloaded",
            Origin::Transformed { .. } => "Transformed",
            Origin::Unpacked { .. } => "Unpacked",
            Origin::Carved {
                carved: CarvedOrigin::Pcap { .. },
                ..
            } => "CarvedPcap",
            Origin::Carved {
                carved: CarvedOrigin::Unknown,
                ..
            } => "CarvedUnknown",
            Origin::Wire { .. } => "Wire",
            Origin::Incident { .. } => "Incident",
            Origin::MemoryDump { .. } => "MemoryDump",
        }
    }

    /// 生成 `origin[...]` 形式的表单字段
    pub fn form_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![(
            "origin[origin_type]".to_string(),
            self.origin_type().to_string(),
        )];
        match self {
            Origin::Downloaded { url, name } => {
                fields.push(("origin[url]".to_string(), url.clone()));
                push_opt(&mut fields, "origin[name]", name);
            }
            Origin::Transformed {
                parent,
                tool,
                flags,
                cmd,
            } => {
                fields.push(("origin[parent]".to_string(), parent.clone()));
                push_opt(&mut fields, "origin[tool]", tool);
                push_list(&mut fields, "origin[flags]", flags);
                push_opt(&mut fields, "origin[cmd]", cmd);
            }
            Origin::Unpacked {
                parent,
                tool,
                flags,
            } => {
                fields.push(("origin[parent]".to_string(), parent.clone()));
                push_opt(&mut fields, "origin[tool]", tool);
                push_list(&mut fields, "origin[flags]", flags);
            }
            Origin::Carved {
                parent,
                tool,
                carved,
            } => {
                fields.push(("origin[parent]".to_string(), parent.clone()));
                push_opt(&mut fields, "origin[tool]", tool);
                if let CarvedOrigin::Pcap {
                    src_ip,
                    dest_ip,
                    src_port,
                    dest_port,
                    proto,
                    url,
                } = carved
                {
                    push_opt(&mut fields, "origin[src_ip]", &src_ip.map(|ip| ip.to_string()));
                    push_opt(&mut fields, "origin[dest_ip]", &dest_ip.map(|ip| ip.to_string()));
                    push_opt(&mut fields, "origin[src_port]", &src_port.map(|p| p.to_string()));
                    push_opt(&mut fields, "origin[dest_port]", &dest_port.map(|p| p.to_string()));
                    push_opt(&mut fields, "origin[proto]", &proto.map(|p| p.to_string()));
                    push_opt(&mut fields, "origin[url]", url);
                }
            }
            Origin::Wire {
                sniffer,
                source,
                destination,
            } => {
                fields.push(("origin[sniffer]".to_string(), sniffer.clone()));
                push_opt(&mut fields, "origin[source]", source);
                push_opt(&mut fields, "origin[destination]", destination);
            }
            Origin::Incident {
                incident,
                cover_term,
                mission_team,
                network,
                machine,
                location,
            } => {
                fields.push(("origin[incident]".to_string(), incident.clone()));
                push_opt(&mut fields, "origin[cover_term]", cover_term);
                push_opt(&mut fields, "origin[mission_team]", mission_team);
                push_opt(&mut fields, "origin[network]", network);
                push_opt(&mut fields, "origin[machine]", machine);
                push_opt(&mut fields, "origin[location]", location);
            }
            Origin::MemoryDump {
                parent,
                memory_type,
                reconstructed,
                base_addr,
            } => {
                fields.push(("origin[parent]".to_string(), parent.clone()));
                push_opt(&mut fields, "origin[memory_type]", memory_type);
                push_list(&mut fields, "origin[reconstructed]", reconstructed);
                push_opt(&mut fields, "origin[base_addr]", base_addr);
            }
        }
        fields
    }
}

/// 用户选中的流水线
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineSelection {
    /// 流水线名称
    pub name: String,
    /// 流水线所属分组
    pub group: String,
}

impl PipelineSelection {
    pub fn new<N: Into<String>, G: Into<String>>(name: N, group: G) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl FromStr for PipelineSelection {
    type Err = String;

    /// 解析 `name@group` 形式
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((name, group)) if !name.is_empty() && !group.is_empty() => {
                Ok(PipelineSelection::new(name, group))
            }
            _ => Err(format!("流水线格式应为 name@group: {}", s)),
        }
    }
}

/// 创建反应的请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRequest {
    /// 反应所属分组
    pub group: String,
    /// 流水线名称
    pub pipeline: String,
    /// 覆盖各镜像参数（本模块总是为空）
    #[serde(default)]
    pub args: HashMap<String, serde_json::Value>,
    /// SLA（秒）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla: Option<u64>,
    /// 反应标签
    #[serde(default)]
    pub tags: Vec<String>,
    /// 执行前需要下载的样本
    #[serde(default)]
    pub samples: Vec<String>,
    /// 触发深度
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_depth: Option<u8>,
}

impl ReactionRequest {
    /// 为某个样本构建反应请求
    pub fn for_sample(selection: &PipelineSelection, sha256: &str) -> Self {
        Self {
            group: selection.group.clone(),
            pipeline: selection.name.clone(),
            args: HashMap::new(),
            sla: None,
            tags: Vec::new(),
            samples: vec![sha256.to_string()],
            trigger_depth: None,
        }
    }
}

/// 上传成功的响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSubmissionResponse {
    /// 样本 sha256（内容寻址标识）
    pub sha256: String,
    #[serde(default)]
    pub sha1: String,
    #[serde(default)]
    pub md5: String,
    /// 本次提交的 ID，文件已存在时为 None
    #[serde(default)]
    pub id: Option<Uuid>,
}

impl SampleSubmissionResponse {
    /// 服务器已有相同内容的文件，只有本地计算的 sha256
    pub fn already_exists(sha256: String) -> Self {
        Self {
            sha256,
            sha1: String::new(),
            md5: String::new(),
            id: None,
        }
    }

    pub fn is_existing(&self) -> bool {
        self.id.is_none()
    }
}

/// 批量创建反应的响应
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkReactionResponse {
    /// 请求下标 -> 错误信息
    #[serde(default)]
    pub errors: HashMap<usize, String>,
    /// 成功创建的反应 ID（按请求顺序排列，跳过失败项）
    #[serde(default)]
    pub created: Vec<Uuid>,
}

impl BulkReactionResponse {
    /// 将批量响应映射回每条请求的结果
    pub fn into_outcomes(self, requests: &[ReactionRequest]) -> Vec<ReactionOutcome> {
        let mut created = self.created.into_iter();
        requests
            .iter()
            .enumerate()
            .map(|(index, req)| {
                let result = match self.errors.get(&index) {
                    Some(err) => Err(err.clone()),
                    None => created
                        .next()
                        .ok_or_else(|| "服务器未返回反应 ID".to_string()),
                };
                ReactionOutcome {
                    pipeline: req.pipeline.clone(),
                    result,
                }
            })
            .collect()
    }
}

/// 单条流水线的提交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionOutcome {
    /// 流水线名称
    pub pipeline: String,
    /// 成功时为反应 ID，失败时为错误信息
    pub result: Result<Uuid, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SampleRequest {
        let mut tags = BTreeMap::new();
        tags.insert(
            "family".to_string(),
            BTreeSet::from(["emotet".to_string(), "loader".to_string()]),
        );
        SampleRequest {
            path: PathBuf::from("/tmp/a.exe"),
            file_name: "a.exe".to_string(),
            groups: vec!["teamX".to_string(), "teamY".to_string()],
            description: Some("dropper".to_string()),
            tags,
            origin: Some(Origin::Downloaded {
                url: "https://example.com/a.exe".to_string(),
                name: None,
            }),
            trigger_depth: 0,
        }
    }

    #[test]
    fn test_sample_form_fields() {
        let fields = request().form_fields();
        let has = |k: &str, v: &str| fields.iter().any(|(fk, fv)| fk == k && fv == v);

        assert!(has("description", "dropper"));
        assert!(has("groups", "teamX"));
        assert!(has("groups", "teamY"));
        assert!(has("tags[family]", "emotet"));
        assert!(has("tags[family]", "loader"));
        assert!(has("origin[origin_type]", "Downloaded"));
        assert!(has("origin[url]", "https://example.com/a.exe"));
        assert!(has("trigger_depth", "0"));
        assert!(!fields.iter().any(|(k, _)| k == "origin[name]"));
    }

    #[test]
    fn test_carved_pcap_origin_fields() {
        let origin = Origin::Carved {
            parent: "abc".to_string(),
            tool: Some("tshark".to_string()),
            carved: CarvedOrigin::Pcap {
                src_ip: Some("10.0.0.1".parse().unwrap()),
                dest_ip: None,
                src_port: Some(443),
                dest_port: None,
                proto: Some(PcapNetworkProtocol::Tcp),
                url: None,
            },
        };
        let fields = origin.form_fields();
        assert_eq!(fields[0].1, "CarvedPcap");
        assert!(fields.contains(&("origin[src_ip]".to_string(), "10.0.0.1".to_string())));
        assert!(fields.contains(&("origin[src_port]".to_string(), "443".to_string())));
        assert!(fields.contains(&("origin[proto]".to_string(), "TCP".to_string())));
        assert!(!fields.iter().any(|(k, _)| k == "origin[dest_ip]"));
    }

    #[test]
    fn test_memory_dump_lists_reconstructed() {
        let origin = Origin::MemoryDump {
            parent: "abc".to_string(),
            memory_type: Some("heap".to_string()),
            reconstructed: vec!["pe_header".to_string(), "iat".to_string()],
            base_addr: Some("0x400000".to_string()),
        };
        let fields = origin.form_fields();
        let reconstructed: Vec<_> = fields
            .iter()
            .filter(|(k, _)| k == "origin[reconstructed]")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(reconstructed, vec!["pe_header", "iat"]);
        assert_eq!(origin.origin_type(), "MemoryDump");
    }

    #[test]
    fn test_pipeline_selection_parse() {
        let p: PipelineSelection = "scan1@teamX".parse().unwrap();
        assert_eq!(p, PipelineSelection::new("scan1", "teamX"));
        assert!("scan1".parse::<PipelineSelection>().is_err());
        assert!("@teamX".parse::<PipelineSelection>().is_err());
    }

    #[test]
    fn test_bulk_response_maps_outcomes_by_index() {
        let selections = [
            PipelineSelection::new("scan1", "teamX"),
            PipelineSelection::new("scan2", "teamX"),
            PipelineSelection::new("scan3", "teamX"),
        ];
        let requests: Vec<_> = selections
            .iter()
            .map(|s| ReactionRequest::for_sample(s, "abc"))
            .collect();
        let first = Uuid::new_v4();
        let third = Uuid::new_v4();
        let response = BulkReactionResponse {
            errors: HashMap::from([(1, "pipeline banned".to_string())]),
            created: vec![first, third],
        };

        let outcomes = response.into_outcomes(&requests);
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].result, Ok(first));
        assert_eq!(outcomes[1].result, Err("pipeline banned".to_string()));
        assert_eq!(outcomes[2].pipeline, "scan3");
        assert_eq!(outcomes[2].result, Ok(third));
    }

    #[test]
    fn test_bulk_response_missing_id_is_failure() {
        let requests = vec![ReactionRequest::for_sample(
            &PipelineSelection::new("scan1", "teamX"),
            "abc",
        )];
        let outcomes = BulkReactionResponse::default().into_outcomes(&requests);
        assert!(outcomes[0].result.is_err());
    }
}
