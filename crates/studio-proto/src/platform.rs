use std::path::PathBuf;

const APP_DIR: &str = "studio";

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/studio/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        // Portable data directory beside the executable wins
        if let Some(dir) = beside_exe("data") {
            return dir;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Some(cfg) = beside_exe("config.toml") {
            if let Some(dir) = cfg.parent() {
                return dir.to_path_buf();
            }
        }
    }

    // On macOS and Linux, always use ~/.config/studio/
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn cache_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(temp_dir)
            .join(".cache")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::cache_dir().unwrap_or_else(temp_dir).join(APP_DIR)
    }
}

#[cfg(windows)]
fn beside_exe(name: &str) -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let p = exe.parent()?.join(name);
    p.exists().then_some(p)
}

#[cfg(target_os = "macos")]
fn opener_binary_names() -> &'static [&'static str] {
    &["open"]
}

#[cfg(all(unix, not(target_os = "macos")))]
fn opener_binary_names() -> &'static [&'static str] {
    &["xdg-open", "gio", "wslview"]
}

#[cfg(windows)]
fn opener_binary_names() -> &'static [&'static str] {
    &["cmd.exe", "cmd"]
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Command used to hand a URL to the desktop: the program plus the
/// arguments that precede the URL.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Find the platform URL opener.
///
/// Searches in order:
/// 1. STUDIO_OPENER environment variable
/// 2. PATH (`xdg-open`/`gio`/`wslview`, `open` on macOS, `cmd /C start` on Windows)
pub fn find_opener() -> Option<OpenerCommand> {
    if let Ok(path) = std::env::var("STUDIO_OPENER") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(OpenerCommand {
                program: p,
                args: Vec::new(),
            });
        }
    }

    let program = find_on_path(opener_binary_names())?;
    let name = program
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let args = match name.as_str() {
        "gio" => vec!["open".to_string()],
        // The empty string is the window title `start` expects first
        "cmd" => vec!["/C".to_string(), "start".to_string(), String::new()],
        _ => Vec::new(),
    };
    Some(OpenerCommand { program, args })
}
