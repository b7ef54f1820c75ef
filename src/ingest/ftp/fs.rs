//! Flat virtual filesystem exposed to uploading cameras.
//!
//! Cameras like to create and enter directories before uploading. Paths are
//! tracked so replies look right, but every upload lands in the camera's
//! media directory regardless.

/// What an authenticated camera may do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub make_dir: bool,
    pub enter: bool,
    pub write: bool,
}

impl Permissions {
    /// Parse permission letters: `m` make directory, `e` enter, `w` write
    pub fn parse(letters: &str) -> Self {
        Self {
            make_dir: letters.contains('m'),
            enter: letters.contains('e'),
            write: letters.contains('w'),
        }
    }
}

/// Permissions of every uploading camera
pub const CAMERA_PERMISSIONS: &str = "mew";

#[derive(Debug, Clone)]
pub struct VirtualFs {
    cwd: String,
}

impl Default for VirtualFs {
    fn default() -> Self {
        Self {
            cwd: "/".to_string(),
        }
    }
}

impl VirtualFs {
    pub fn pwd(&self) -> &str {
        &self.cwd
    }

    /// Absolute, normalized form of `path` relative to the current directory
    pub fn resolve(&self, path: &str) -> String {
        let mut parts: Vec<&str> = if path.starts_with('/') {
            Vec::new()
        } else {
            self.cwd.split('/').filter(|p| !p.is_empty()).collect()
        };

        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                part => parts.push(part),
            }
        }

        format!("/{}", parts.join("/"))
    }

    pub fn cwd(&mut self, path: &str) -> &str {
        self.cwd = self.resolve(path);
        &self.cwd
    }

    pub fn cdup(&mut self) -> &str {
        self.cwd("..")
    }
}

/// MIME type of an uploaded file, from its name
pub fn upload_mime(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_permissions() {
        let perms = Permissions::parse(CAMERA_PERMISSIONS);
        assert!(perms.make_dir && perms.enter && perms.write);
        assert_eq!(
            Permissions::parse("e"),
            Permissions {
                make_dir: false,
                enter: true,
                write: false
            }
        );
    }

    #[test]
    fn navigation() {
        let mut fs = VirtualFs::default();
        assert_eq!(fs.pwd(), "/");
        assert_eq!(fs.cwd("snapshots/2024"), "/snapshots/2024");
        assert_eq!(fs.cdup(), "/snapshots");
        assert_eq!(fs.cwd("../../.."), "/");
        assert_eq!(fs.resolve("/a/./b/"), "/a/b");
    }

    #[test]
    fn mime_from_filename() {
        assert_eq!(upload_mime("MDAlarm_20240101.jpg"), "image/jpeg");
        assert_eq!(upload_mime("clip.png"), "image/png");
        assert_eq!(upload_mime("noextension"), "application/octet-stream");
    }
}
