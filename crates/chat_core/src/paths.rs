use std::path::PathBuf;

/// Application directory (~/.xchat)
pub fn xchat_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(".xchat")
}

/// Path of the JSON config file
pub fn config_json_path() -> PathBuf {
    xchat_dir().join("config.json")
}
