mod error;
mod settings;

pub use error::GatewayError;
pub use settings::{Settings, SettingsError, SettingsPatch};
