//! torrc generation and workspace files

use super::LaunchError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Prefix for temporary data directories
pub const DATA_DIR_PREFIX: &str = "bridget-tordata";

/// Options written into a generated torrc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrcConfig {
    pub control_port: u16,
    pub socks_port: u16,
    pub cookie_authentication: bool,
    /// Filled in by `write_torrc`
    pub data_directory: Option<PathBuf>,
    /// `Bridge` lines; `UseBridges 1` is added when non-empty
    pub bridges: Vec<String>,
    /// Extra raw `Key Value` lines
    pub extra: Vec<String>,
}

impl TorrcConfig {
    pub fn new(control_port: u16, socks_port: u16) -> Self {
        Self {
            control_port,
            socks_port,
            cookie_authentication: true,
            data_directory: None,
            bridges: Vec::new(),
            extra: Vec::new(),
        }
    }

    /// Render the torrc text
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("ControlPort {}", self.control_port),
            format!("SocksPort {}", self.socks_port),
            format!(
                "CookieAuthentication {}",
                if self.cookie_authentication { 1 } else { 0 }
            ),
        ];

        if let Some(dir) = &self.data_directory {
            lines.push(format!("DataDirectory {}", dir.display()));
        }

        if !self.bridges.is_empty() {
            lines.push("UseBridges 1".to_string());
            for bridge in &self.bridges {
                lines.push(format!("Bridge {}", bridge));
            }
        }

        lines.extend(self.extra.iter().cloned());

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

/// A torrc written to disk, plus everything created to hold it
#[derive(Debug, Clone)]
pub struct WrittenTorrc {
    pub torrc: PathBuf,
    pub data_dir: PathBuf,
    /// Temporary paths to remove at shutdown
    pub delete_list: Vec<PathBuf>,
}

/// Write a torrc into `data_dir`, creating a temporary directory if none
/// is given
///
/// Sets `conf.data_directory`. Every temporary file or directory created
/// ends up in the returned delete list; on error they are removed before
/// returning.
pub fn write_torrc(
    conf: &mut TorrcConfig,
    data_dir: Option<&Path>,
) -> Result<WrittenTorrc, LaunchError> {
    let mut delete_list = Vec::new();

    let data_dir = match data_dir {
        Some(dir) => {
            fs::create_dir_all(dir).map_err(LaunchError::Workspace)?;
            dir.to_path_buf()
        },
        None => {
            let dir = tempfile::Builder::new()
                .prefix(DATA_DIR_PREFIX)
                .tempdir()
                .map_err(LaunchError::Workspace)?
                .keep();
            delete_list.push(dir.clone());
            dir
        },
    };
    conf.data_directory = Some(data_dir.clone());

    let written = write_torrc_file(conf, &data_dir, &mut delete_list);
    let torrc = discard_on_error(written, &delete_list)?;

    debug!("Wrote torrc to {:?}", torrc);
    Ok(WrittenTorrc {
        torrc,
        data_dir,
        delete_list,
    })
}

fn write_torrc_file(
    conf: &TorrcConfig,
    data_dir: &Path,
    delete_list: &mut Vec<PathBuf>,
) -> Result<PathBuf, LaunchError> {
    let mut file = tempfile::Builder::new()
        .prefix("torrc")
        .tempfile_in(data_dir)
        .map_err(LaunchError::Workspace)?;
    let torrc = file.path().to_path_buf();
    delete_list.push(torrc.clone());

    file.write_all(conf.render().as_bytes())
        .map_err(LaunchError::Workspace)?;
    file.keep().map_err(|e| LaunchError::Workspace(e.error))?;
    Ok(torrc)
}

/// Remove everything in `delete_list` if `result` is an error
fn discard_on_error<T>(
    result: Result<T, LaunchError>,
    delete_list: &[PathBuf],
) -> Result<T, LaunchError> {
    if result.is_err() {
        delete_files_or_dirs(delete_list);
    }
    result
}

/// Delete every file or directory in `paths`, ignoring all errors
pub fn delete_files_or_dirs(paths: &[PathBuf]) {
    for path in paths {
        if fs::remove_file(path).is_err() {
            let _ = fs::remove_dir_all(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_bridges() {
        let mut conf = TorrcConfig::new(9052, 9050);
        conf.bridges.push("1.2.3.4:443".to_string());
        conf.extra.push("Log notice stdout".to_string());
        let text = conf.render();

        assert!(text.starts_with("ControlPort 9052\nSocksPort 9050\nCookieAuthentication 1\n"));
        assert!(text.contains("UseBridges 1\nBridge 1.2.3.4:443\n"));
        assert!(text.ends_with("Log notice stdout\n"));
    }

    #[test]
    fn test_write_torrc_creates_temp_data_dir() {
        let mut conf = TorrcConfig::new(9052, 9050);
        let written = write_torrc(&mut conf, None).unwrap();

        assert!(written.data_dir.is_dir());
        assert!(written
            .data_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(DATA_DIR_PREFIX));
        assert_eq!(written.delete_list, vec![written.data_dir.clone(), written.torrc.clone()]);

        let text = fs::read_to_string(&written.torrc).unwrap();
        assert!(text.contains(&format!("DataDirectory {}", written.data_dir.display())));

        delete_files_or_dirs(&written.delete_list);
        assert!(!written.data_dir.exists());
    }

    #[test]
    fn test_write_torrc_keeps_caller_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut conf = TorrcConfig::new(9052, 9050);
        let written = write_torrc(&mut conf, Some(dir.path())).unwrap();

        assert_eq!(written.delete_list, vec![written.torrc.clone()]);
        delete_files_or_dirs(&written.delete_list);
        assert!(dir.path().exists());
        assert!(!written.torrc.exists());
    }

    #[test]
    fn test_failed_torrc_write_removes_created_dir() {
        let data_dir = tempfile::Builder::new()
            .prefix(DATA_DIR_PREFIX)
            .tempdir()
            .unwrap()
            .keep();
        let mut delete_list = vec![data_dir.clone()];
        let conf = TorrcConfig::new(9052, 9050);

        let written = write_torrc_file(&conf, &data_dir.join("missing"), &mut delete_list);
        let result = discard_on_error(written, &delete_list);

        assert!(matches!(result, Err(LaunchError::Workspace(_))));
        assert!(!data_dir.exists());
    }

    #[test]
    fn test_successful_write_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut delete_list = Vec::new();
        let conf = TorrcConfig::new(9052, 9050);

        let written = write_torrc_file(&conf, dir.path(), &mut delete_list);
        let torrc = discard_on_error(written, &delete_list).unwrap();

        assert!(torrc.is_file());
        assert_eq!(delete_list, vec![torrc]);
    }

    #[test]
    fn test_delete_ignores_missing_paths() {
        delete_files_or_dirs(&[PathBuf::from("/nonexistent/onionprobe/file")]);
    }
}
