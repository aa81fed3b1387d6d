use serde::{Deserialize, Serialize};

/// 注册中心返回的健康实例
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryInstance {
    pub id: String,
    /// host:port
    pub address: String,
}

impl RegistryInstance {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}
