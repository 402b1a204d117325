use super::{Catalog, CatalogEntry};
use crate::protocol::Args;
use serde::{Deserialize, Serialize};

/// Queue metadata; the messages themselves live in the message store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgQueue {
    pub name: String,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    #[serde(default)]
    pub args: Args,
}

impl MsgQueue {
    pub fn new(name: &str, durable: bool, exclusive: bool, auto_delete: bool, args: Args) -> Self {
        Self {
            name: name.to_string(),
            durable,
            exclusive,
            auto_delete,
            args,
        }
    }
}

impl CatalogEntry for MsgQueue {
    const KIND: &'static str = "queue";

    fn key(&self) -> &str {
        &self.name
    }

    fn durable(&self) -> bool {
        self.durable
    }
}

pub type QueueCatalog = Catalog<MsgQueue>;
