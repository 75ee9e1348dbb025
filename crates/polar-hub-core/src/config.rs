//! Runtime configuration. The binary crate owns CLI/env parsing (clap);
//! this is the plain config shape the pipeline itself consumes.

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub influx_host: String,
    pub influx_port: u16,
    pub influx_database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Influx,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            influx_host: "localhost".to_string(),
            influx_port: 8086,
            influx_database: "polar_hub".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn build(&self) -> crate::store::Store {
        match self.backend {
            StoreBackend::Memory => crate::store::Store::Memory(crate::store::MemoryStore::new()),
            StoreBackend::Influx => crate::store::Store::Influx(crate::store::InfluxStore::new(
                &self.influx_host,
                self.influx_port,
                self.influx_database.clone(),
            )),
        }
    }
}
