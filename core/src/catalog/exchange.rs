use super::{Catalog, CatalogEntry};
use crate::protocol::{Args, ExchangeType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub name: String,
    pub exchange_type: ExchangeType,
    pub durable: bool,
    pub auto_delete: bool,
    #[serde(default)]
    pub args: Args,
}

impl Exchange {
    pub fn new(
        name: &str,
        exchange_type: ExchangeType,
        durable: bool,
        auto_delete: bool,
        args: Args,
    ) -> Self {
        Self {
            name: name.to_string(),
            exchange_type,
            durable,
            auto_delete,
            args,
        }
    }
}

impl CatalogEntry for Exchange {
    const KIND: &'static str = "exchange";

    fn key(&self) -> &str {
        &self.name
    }

    fn durable(&self) -> bool {
        self.durable
    }
}

pub type ExchangeCatalog = Catalog<Exchange>;
