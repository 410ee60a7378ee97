use envconfig::Envconfig;

use compare_common::config::ExtractionConfig;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3303")]
    pub port: u16,

    #[envconfig(default = "52428800")]
    pub max_upload_bytes: usize,

    #[envconfig(nested = true)]
    pub extraction: ExtractionConfig,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
