pub mod modules;
pub mod navigate;

use crate::config::PrismConfig;

pub struct CommandContext {
    pub config: PrismConfig,
}

impl CommandContext {
    pub fn new(config: PrismConfig) -> Self {
        Self { config }
    }
}
