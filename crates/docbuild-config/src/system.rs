//! System configuration parsing and dotted property access.
//!
//! ```kdl
//! daemon {
//!     check-interval 300
//!     max-containers 15
//!     history 50
//!     debug #false
//! }
//! api {
//!     enabled #true
//!     listen "0.0.0.0:5555"
//! }
//! paths {
//!     home "~/.docbuild"
//!     projects "~/.docbuild/projects.kdl"
//! }
//! container {
//!     image "docbuild/renderer:latest"
//! }
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use crate::kdl_util::{child, get_first_bool_arg, get_first_int_arg, get_first_string_arg, parse_file};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CHECK_INTERVAL: u64 = 300;
pub const DEFAULT_MAX_CONTAINERS: usize = 15;
pub const DEFAULT_HISTORY: usize = 50;
pub const DEFAULT_LISTEN: &str = "0.0.0.0:5555";
pub const DEFAULT_HOME: &str = "~/.docbuild";
pub const DEFAULT_IMAGE: &str = "docbuild/renderer:latest";
pub const DEFAULT_REPO_DIR: &str = "/tmp/build";
pub const DEFAULT_RENDER_COMMAND: &str =
    "/tmp/build.sh ${document.name} ${format} ${repo.path} ${repo.dir}";

/// Value type of a configuration property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyKind {
    Integer,
    Bool,
    Text,
}

/// Every settable property, as `section.key`.
const PROPERTIES: &[(&str, PropertyKind)] = &[
    ("daemon.check-interval", PropertyKind::Integer),
    ("daemon.max-containers", PropertyKind::Integer),
    ("daemon.history", PropertyKind::Integer),
    ("daemon.debug", PropertyKind::Bool),
    ("api.enabled", PropertyKind::Bool),
    ("api.listen", PropertyKind::Text),
    ("paths.home", PropertyKind::Text),
    ("paths.projects", PropertyKind::Text),
    ("paths.auth", PropertyKind::Text),
    ("paths.scripts", PropertyKind::Text),
    ("container.image", PropertyKind::Text),
    ("container.repo-dir", PropertyKind::Text),
    ("container.render-command", PropertyKind::Text),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSettings {
    /// Seconds between repository scans.
    pub check_interval: u64,
    /// Maximum number of concurrently running build environments.
    pub max_containers: usize,
    /// Number of finished jobs kept for status queries.
    pub history: usize,
    /// Record the environment id in build info records.
    pub debug: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            max_containers: DEFAULT_MAX_CONTAINERS,
            history: DEFAULT_HISTORY,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub enabled: bool,
    pub listen: SocketAddr,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: ([0, 0, 0, 0], 5555).into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSettings {
    pub home: PathBuf,
    pub projects: PathBuf,
    pub auth: PathBuf,
    pub scripts: PathBuf,
}

impl PathSettings {
    fn under(home: PathBuf) -> Self {
        Self {
            projects: home.join("projects.kdl"),
            auth: home.join("auth.kdl"),
            scripts: home.join("scripts"),
            home,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    pub image: String,
    /// Build directory inside the environment.
    pub repo_dir: String,
    /// Render command template, see [`crate::RenderContext`].
    pub render_command: String,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            repo_dir: DEFAULT_REPO_DIR.to_string(),
            render_command: DEFAULT_RENDER_COMMAND.to_string(),
        }
    }
}

/// Daemon-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    pub daemon: DaemonSettings,
    pub api: ApiSettings,
    pub paths: PathSettings,
    pub container: ContainerSettings,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings::default(),
            api: ApiSettings::default(),
            paths: PathSettings::under(expand_home(DEFAULT_HOME)),
            container: ContainerSettings::default(),
        }
    }
}

/// `~/.docbuild/config.kdl`.
pub fn default_config_path() -> PathBuf {
    expand_home(DEFAULT_HOME).join("config.kdl")
}

/// Expand a leading `~` to `$HOME`.
pub fn expand_home(path: &str) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

impl SystemConfig {
    /// Load the configuration at `path`, falling back to defaults if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }
        let doc = parse_file(path)?;
        Self::from_document(&doc)
    }

    /// Parse configuration from KDL text.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let doc: KdlDocument = text.parse()?;
        Self::from_document(&doc)
    }

    fn from_document(doc: &KdlDocument) -> ConfigResult<Self> {
        let section = |name: &str| doc.nodes().iter().find(|n| n.name().value() == name);
        let mut config = Self::default();

        if let Some(daemon) = section("daemon") {
            if let Some(v) = positive_int(daemon, "daemon.check-interval")? {
                config.daemon.check_interval = v as u64;
            }
            if let Some(v) = positive_int(daemon, "daemon.max-containers")? {
                config.daemon.max_containers = v as usize;
            }
            if let Some(v) = positive_int(daemon, "daemon.history")? {
                config.daemon.history = v as usize;
            }
            if let Some(v) = bool_value(daemon, "daemon.debug")? {
                config.daemon.debug = v;
            }
        }

        if let Some(api) = section("api") {
            if let Some(v) = bool_value(api, "api.enabled")? {
                config.api.enabled = v;
            }
            if let Some(listen) = text_value(api, "api.listen")? {
                config.api.listen = parse_listen(&listen)?;
            }
        }

        if let Some(paths) = section("paths") {
            let home = text_value(paths, "paths.home")?
                .map(|h| expand_home(&h))
                .unwrap_or_else(|| config.paths.home.clone());
            config.paths = PathSettings::under(home);
            if let Some(v) = text_value(paths, "paths.projects")? {
                config.paths.projects = expand_home(&v);
            }
            if let Some(v) = text_value(paths, "paths.auth")? {
                config.paths.auth = expand_home(&v);
            }
            if let Some(v) = text_value(paths, "paths.scripts")? {
                config.paths.scripts = expand_home(&v);
            }
        }

        if let Some(container) = section("container") {
            if let Some(v) = text_value(container, "container.image")? {
                config.container.image = v;
            }
            if let Some(v) = text_value(container, "container.repo-dir")? {
                config.container.repo_dir = v;
            }
            if let Some(v) = text_value(container, "container.render-command")? {
                config.container.render_command = v;
            }
        }

        Ok(config)
    }

    pub fn builds_dir(&self) -> PathBuf {
        self.paths.home.join("builds")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.paths.home.join("logs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.paths.home.join("tmp")
    }

    /// The CLI's own bearer token.
    pub fn token_path(&self) -> PathBuf {
        self.paths.home.join("token")
    }

    /// Create the home directory and the directories derived from it.
    pub fn ensure_dirs(&self) -> ConfigResult<()> {
        for dir in [self.builds_dir(), self.logs_dir(), self.tmp_dir()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Effective value of a dotted property such as `daemon.check-interval`.
    pub fn get_property(&self, key: &str) -> ConfigResult<String> {
        let value = match key {
            "daemon.check-interval" => self.daemon.check_interval.to_string(),
            "daemon.max-containers" => self.daemon.max_containers.to_string(),
            "daemon.history" => self.daemon.history.to_string(),
            "daemon.debug" => self.daemon.debug.to_string(),
            "api.enabled" => self.api.enabled.to_string(),
            "api.listen" => self.api.listen.to_string(),
            "paths.home" => self.paths.home.display().to_string(),
            "paths.projects" => self.paths.projects.display().to_string(),
            "paths.auth" => self.paths.auth.display().to_string(),
            "paths.scripts" => self.paths.scripts.display().to_string(),
            "container.image" => self.container.image.clone(),
            "container.repo-dir" => self.container.repo_dir.clone(),
            "container.render-command" => self.container.render_command.clone(),
            other => return Err(ConfigError::UnknownProperty(other.to_string())),
        };
        Ok(value)
    }

    /// Names of all properties accepted by [`get_property`](Self::get_property).
    pub fn property_names() -> impl Iterator<Item = &'static str> {
        PROPERTIES.iter().map(|(name, _)| *name)
    }
}

/// Set a dotted property in the configuration file at `path`, creating it if needed.
///
/// The value is validated by re-parsing the resulting document before it is written.
pub fn set_property(path: &Path, key: &str, value: &str) -> ConfigResult<()> {
    let kind = PROPERTIES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| ConfigError::UnknownProperty(key.to_string()))?;
    let (section_name, field) = key
        .split_once('.')
        .ok_or_else(|| ConfigError::UnknownProperty(key.to_string()))?;

    let typed: KdlValue = match kind {
        PropertyKind::Integer => value
            .parse::<i128>()
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                message: format!("'{}' is not an integer", value),
            })?
            .into(),
        PropertyKind::Bool => value
            .parse::<bool>()
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                message: format!("'{}' is not true or false", value),
            })?
            .into(),
        PropertyKind::Text => value.into(),
    };

    let mut doc = if path.exists() {
        parse_file(path)?
    } else {
        KdlDocument::new()
    };

    let existing = doc
        .nodes()
        .iter()
        .position(|n| n.name().value() == section_name);
    let index = match existing {
        Some(index) => index,
        None => {
            doc.nodes_mut().push(KdlNode::new(section_name));
            doc.nodes().len() - 1
        }
    };
    let section = &mut doc.nodes_mut()[index];

    let children = section.ensure_children();
    match children
        .nodes_mut()
        .iter_mut()
        .find(|n| n.name().value() == field)
    {
        Some(existing) => {
            existing.entries_mut().clear();
            existing.push(KdlEntry::new(typed));
        }
        None => {
            let mut node = KdlNode::new(field);
            node.push(KdlEntry::new(typed));
            children.nodes_mut().push(node);
        }
    }

    SystemConfig::from_document(&doc)?;
    doc.autoformat();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, doc.to_string())?;
    debug!(key = %key, value = %value, "Configuration property updated");
    Ok(())
}

fn field_node<'a>(section: &'a KdlNode, key: &str) -> Option<&'a KdlNode> {
    let field = key.split_once('.').map(|(_, f)| f).unwrap_or(key);
    child(section, field)
}

fn present_without_value(node: &KdlNode) -> bool {
    node.entries().iter().all(|e| e.name().is_some())
}

fn positive_int(section: &KdlNode, key: &str) -> ConfigResult<Option<i128>> {
    let Some(node) = field_node(section, key) else {
        return Ok(None);
    };
    if present_without_value(node) {
        return Err(ConfigError::MissingField(key.to_string()));
    }
    match get_first_int_arg(node) {
        Some(v) if v >= 1 => Ok(Some(v)),
        Some(v) => Err(ConfigError::InvalidValue {
            field: key.to_string(),
            message: format!("must be at least 1, got {}", v),
        }),
        None => Err(ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected an integer".to_string(),
        }),
    }
}

fn bool_value(section: &KdlNode, key: &str) -> ConfigResult<Option<bool>> {
    let Some(node) = field_node(section, key) else {
        return Ok(None);
    };
    if present_without_value(node) {
        return Err(ConfigError::MissingField(key.to_string()));
    }
    get_first_bool_arg(node)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected #true or #false".to_string(),
        })
}

fn text_value(section: &KdlNode, key: &str) -> ConfigResult<Option<String>> {
    let Some(node) = field_node(section, key) else {
        return Ok(None);
    };
    if present_without_value(node) {
        return Err(ConfigError::MissingField(key.to_string()));
    }
    get_first_string_arg(node)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: key.to_string(),
            message: "expected a string".to_string(),
        })
}

fn parse_listen(listen: &str) -> ConfigResult<SocketAddr> {
    listen.parse().map_err(|_| ConfigError::InvalidValue {
        field: "api.listen".to_string(),
        message: format!("'{}' is not a socket address", listen),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SystemConfig::parse("").unwrap();
        assert_eq!(config.daemon.check_interval, 300);
        assert_eq!(config.daemon.max_containers, 15);
        assert_eq!(config.daemon.history, 50);
        assert!(config.api.enabled);
        assert_eq!(config.api.listen.port(), 5555);
        assert_eq!(config.container.image, DEFAULT_IMAGE);
    }

    #[test]
    fn test_parse_sections() {
        let config = SystemConfig::parse(
            r#"
            daemon {
                check-interval 60
                max-containers 2
                debug #true
            }
            api {
                enabled #false
                listen "127.0.0.1:7000"
            }
            paths {
                home "/srv/docbuild"
                scripts "/opt/scripts"
            }
            container {
                image "registry.example.com/render:2"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.daemon.check_interval, 60);
        assert_eq!(config.daemon.max_containers, 2);
        assert_eq!(config.daemon.history, DEFAULT_HISTORY);
        assert!(config.daemon.debug);
        assert!(!config.api.enabled);
        assert_eq!(config.api.listen.to_string(), "127.0.0.1:7000");
        assert_eq!(config.paths.home, PathBuf::from("/srv/docbuild"));
        assert_eq!(
            config.paths.projects,
            PathBuf::from("/srv/docbuild/projects.kdl")
        );
        assert_eq!(config.paths.scripts, PathBuf::from("/opt/scripts"));
        assert_eq!(config.logs_dir(), PathBuf::from("/srv/docbuild/logs"));
        assert_eq!(config.container.image, "registry.example.com/render:2");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let result = SystemConfig::parse("daemon {\n max-containers 0\n}\n");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_key_without_value_is_missing() {
        let result = SystemConfig::parse("container {\n image\n}\n");
        assert!(matches!(result, Err(ConfigError::MissingField(key)) if key == "container.image"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SystemConfig::load(dir.path().join("config.kdl")).unwrap();
        assert_eq!(config.daemon.max_containers, DEFAULT_MAX_CONTAINERS);
    }

    #[test]
    fn test_get_property() {
        let config = SystemConfig::parse("daemon {\n check-interval 42\n}\n").unwrap();
        assert_eq!(config.get_property("daemon.check-interval").unwrap(), "42");
        assert_eq!(config.get_property("api.enabled").unwrap(), "true");
        assert!(matches!(
            config.get_property("daemon.nope"),
            Err(ConfigError::UnknownProperty(_))
        ));
    }

    #[test]
    fn test_set_property_creates_and_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.kdl");

        set_property(&path, "daemon.max-containers", "4").unwrap();
        set_property(&path, "container.image", "render:test").unwrap();
        set_property(&path, "daemon.max-containers", "6").unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(config.daemon.max_containers, 6);
        assert_eq!(config.container.image, "render:test");
    }

    #[test]
    fn test_set_property_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.kdl");

        assert!(matches!(
            set_property(&path, "daemon.history", "many"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            set_property(&path, "api.listen", "nowhere"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            set_property(&path, "unknown.key", "1"),
            Err(ConfigError::UnknownProperty(_))
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_home("~/x"), PathBuf::from(home).join("x"));
        }
    }
}
