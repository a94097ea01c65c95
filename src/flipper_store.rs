// Flipper angles survive restarts in a one-line text file: "fr:fl:br:bl"

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{FLIPPER_ANGLE_DEFAULT, FLIPPER_ANGLE_FILE};
use crate::messages::FlipperAngles;

#[derive(Debug, Clone)]
pub struct FlipperAngleStore {
    path: PathBuf,
}

impl FlipperAngleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under `$HOME`, or the working directory when `HOME` is unset
    pub fn in_home() -> Self {
        let dir = match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home),
            None => {
                warn!("HOME is not set, keeping flipper angles in the working directory");
                PathBuf::from(".")
            }
        };
        Self::new(dir.join(FLIPPER_ANGLE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved angles. Anything unreadable yields the default pose.
    pub fn load(&self) -> FlipperAngles {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) => {
                info!("No saved flipper angles at {}: {}", self.path.display(), e);
                return FlipperAngles::uniform(FLIPPER_ANGLE_DEFAULT);
            }
        };

        match parse_angles(text.lines().next().unwrap_or("")) {
            Some(angles) => {
                debug!("Restored flipper angles {:?}", angles);
                angles
            }
            None => {
                warn!("Malformed flipper angle file {}, using defaults", self.path.display());
                FlipperAngles::uniform(FLIPPER_ANGLE_DEFAULT)
            }
        }
    }

    /// Overwrite the file with the current angles
    pub fn save(&self, angles: &FlipperAngles) -> io::Result<()> {
        fs::write(
            &self.path,
            format!(
                "{}:{}:{}:{}\n",
                angles.front_right, angles.front_left, angles.back_right, angles.back_left
            ),
        )
    }
}

fn parse_angles(line: &str) -> Option<FlipperAngles> {
    let mut fields = line.split(':').map(|field| field.trim().parse::<f64>());
    let mut next = || fields.next()?.ok();
    Some(FlipperAngles {
        front_right: next()?,
        front_left: next()?,
        back_right: next()?,
        back_left: next()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> FlipperAngleStore {
        let path = std::env::temp_dir().join(format!(
            "flipper_store_{}_{}.txt",
            name,
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        FlipperAngleStore::new(path)
    }

    #[test]
    fn test_missing_file_is_default() {
        let store = temp_store("missing");
        assert_eq!(store.load(), FlipperAngles::uniform(FLIPPER_ANGLE_DEFAULT));
    }

    #[test]
    fn test_save_then_load() {
        let store = temp_store("save");
        let angles = FlipperAngles {
            front_right: 1.25,
            front_left: -0.5,
            back_right: 3.0,
            back_left: 0.123456789,
        };
        store.save(&angles).unwrap();
        assert_eq!(store.load(), angles);

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(text, "1.25:-0.5:3:0.123456789\n");
        fs::remove_file(store.path()).unwrap();
    }

    #[test]
    fn test_malformed_file_is_default() {
        let store = temp_store("malformed");
        for content in ["", "1.0:2.0:3.0", "a:b:c:d", "1.0;2.0;3.0;4.0"] {
            fs::write(store.path(), content).unwrap();
            assert_eq!(
                store.load(),
                FlipperAngles::uniform(FLIPPER_ANGLE_DEFAULT),
                "content {:?}",
                content
            );
        }
        fs::remove_file(store.path()).unwrap();
    }

    #[test]
    fn test_only_first_line_is_read() {
        let store = temp_store("lines");
        fs::write(store.path(), " 0.1 : 0.2 : 0.3 : 0.4\ngarbage\n").unwrap();
        let angles = store.load();
        assert_eq!(angles.front_right, 0.1);
        assert_eq!(angles.back_left, 0.4);
        fs::remove_file(store.path()).unwrap();
    }
}
