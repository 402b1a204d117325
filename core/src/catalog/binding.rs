use super::RowStore;
use crate::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Attaches a queue to an exchange under a binding key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub exchange_name: String,
    pub queue_name: String,
    pub binding_key: String,
    /// True only when both the exchange and the queue are durable
    pub durable: bool,
}

impl Binding {
    pub fn new(exchange_name: &str, queue_name: &str, binding_key: &str, durable: bool) -> Self {
        Self {
            exchange_name: exchange_name.to_string(),
            queue_name: queue_name.to_string(),
            binding_key: binding_key.to_string(),
            durable,
        }
    }

    fn row_key(exchange_name: &str, queue_name: &str) -> Result<String> {
        Ok(serde_json::to_string(&(exchange_name, queue_name))?)
    }
}

/// Bindings of one exchange, keyed by queue name
pub type QueueBindings = HashMap<String, Arc<Binding>>;

pub struct BindingCatalog {
    table: Box<dyn RowStore<Binding>>,
    bindings: Mutex<HashMap<String, QueueBindings>>,
}

impl BindingCatalog {
    pub fn new(table: Box<dyn RowStore<Binding>>) -> Result<Self> {
        table.create_table()?;
        let catalog = Self {
            table,
            bindings: Mutex::new(HashMap::new()),
        };

        let recovered = catalog.recover()?;
        {
            let mut bindings = catalog.bindings.lock();
            let count = recovered.len();
            for binding in recovered {
                bindings
                    .entry(binding.exchange_name.clone())
                    .or_default()
                    .insert(binding.queue_name.clone(), Arc::new(binding));
            }
            if count > 0 {
                info!("Recovered {} binding entries", count);
            }
        }
        Ok(catalog)
    }

    /// Bind `queue_name` to `exchange_name`. Re-binding an existing pair is a
    /// no-op and keeps the original binding key.
    pub fn bind(
        &self,
        exchange_name: &str,
        queue_name: &str,
        binding_key: &str,
        durable: bool,
    ) -> Result<()> {
        let mut bindings = self.bindings.lock();
        let exists = bindings
            .get(exchange_name)
            .map_or(false, |queues| queues.contains_key(queue_name));
        if exists {
            debug!("Binding {} -> {} already exists", exchange_name, queue_name);
            return Ok(());
        }

        let binding = Binding::new(exchange_name, queue_name, binding_key, durable);
        if durable {
            self.table
                .insert(&Binding::row_key(exchange_name, queue_name)?, &binding)?;
        }
        info!(
            "Bound queue '{}' to exchange '{}' with key '{}'",
            queue_name, exchange_name, binding_key
        );
        bindings
            .entry(exchange_name.to_string())
            .or_default()
            .insert(queue_name.to_string(), Arc::new(binding));
        Ok(())
    }

    pub fn unbind(&self, exchange_name: &str, queue_name: &str) -> Result<()> {
        let mut bindings = self.bindings.lock();
        let Some(queues) = bindings.get_mut(exchange_name) else {
            return Ok(());
        };
        let Some(binding) = queues.get(queue_name) else {
            return Ok(());
        };
        if binding.durable {
            self.table.delete(&Binding::row_key(exchange_name, queue_name)?)?;
        }
        queues.remove(queue_name);
        if queues.is_empty() {
            bindings.remove(exchange_name);
        }
        info!("Unbound queue '{}' from exchange '{}'", queue_name, exchange_name);
        Ok(())
    }

    /// Remove every binding of `exchange_name`
    pub fn remove_exchange_bindings(&self, exchange_name: &str) -> Result<()> {
        let mut bindings = self.bindings.lock();
        let Some(queues) = bindings.get(exchange_name) else {
            return Ok(());
        };
        for binding in queues.values().filter(|b| b.durable) {
            self.table
                .delete(&Binding::row_key(exchange_name, &binding.queue_name)?)?;
        }
        bindings.remove(exchange_name);
        debug!("Removed all bindings of exchange '{}'", exchange_name);
        Ok(())
    }

    /// Remove every binding that targets `queue_name`, across all exchanges
    pub fn remove_queue_bindings(&self, queue_name: &str) -> Result<()> {
        let mut bindings = self.bindings.lock();
        for (exchange_name, queues) in bindings.iter_mut() {
            if let Some(binding) = queues.get(queue_name) {
                if binding.durable {
                    self.table
                        .delete(&Binding::row_key(exchange_name, queue_name)?)?;
                }
                queues.remove(queue_name);
            }
        }
        bindings.retain(|_, queues| !queues.is_empty());
        debug!("Removed all bindings of queue '{}'", queue_name);
        Ok(())
    }

    /// Snapshot of the bindings of one exchange
    pub fn exchange_bindings(&self, exchange_name: &str) -> QueueBindings {
        self.bindings
            .lock()
            .get(exchange_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn select(&self, exchange_name: &str, queue_name: &str) -> Option<Arc<Binding>> {
        self.bindings
            .lock()
            .get(exchange_name)
            .and_then(|queues| queues.get(queue_name).cloned())
    }

    pub fn exists(&self, exchange_name: &str, queue_name: &str) -> bool {
        self.select(exchange_name, queue_name).is_some()
    }

    pub fn recover(&self) -> Result<Vec<Binding>> {
        self.table.scan()
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().values().map(|queues| queues.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<()> {
        let mut bindings = self.bindings.lock();
        self.table.drop_table()?;
        bindings.clear();
        Ok(())
    }
}
