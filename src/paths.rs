use std::path::PathBuf;

pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("VOICEFEED_HOME") {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config").join("voicefeed"),
        None => PathBuf::from("."),
    }
}

pub fn default_config_path() -> PathBuf {
    default_data_dir().join("voicefeed.toml")
}
