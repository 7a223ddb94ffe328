use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error(
        "Stack file not found. Looked in:\n\
        - the current directory: stack.local.kdl, .stack.local.kdl, stack.kdl, .stack.kdl\n\
        - the ./.stackflow/ directory\n\
        - ~/.config/stackflow/stack.kdl\n\
        Set STACKFLOW_FILE to point at a file directly"
    )]
    StackFileNotFound,

    #[error("Invalid settings in {path}: {message}")]
    InvalidSettings { path: String, message: String },

    #[error("Invalid setting {name}: {message}")]
    InvalidSetting { name: String, message: String },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
