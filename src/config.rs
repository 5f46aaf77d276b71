//! Configuration file support for eload-ingest.
//!
//! Load settings from `.eload-ingest.toml` or `~/.config/eload-ingest/config.toml`.
//!
//! ## Config Resolution Order
//!
//! 1. CLI flags (highest priority)
//! 2. Environment variables (`ELOAD_INGEST_*`)
//! 3. Profile-specific settings (if `--profile` specified)
//! 4. Project-level `.eload-ingest.toml`
//! 5. User-level `~/.config/eload-ingest/config.toml`
//! 6. Built-in defaults (lowest priority)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::runner::EngineSettings;

/// Main configuration structure for eload-ingest.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
pub struct IngestConfig {
    /// Directory holding one project directory per project accession.
    pub projects_dir: PathBuf,
    /// Public FTP directory the accession workflow copies files to.
    pub public_ftp_dir: Option<PathBuf>,
    /// Workflow engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Helper tool locations.
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Executables passed through to every workflow.
    #[serde(default)]
    pub executables: BTreeMap<String, String>,
    /// Jars passed through to every workflow.
    #[serde(default)]
    pub jars: BTreeMap<String, String>,
}

/// Workflow engine settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Engine executable.
    #[serde(default = "default_engine_executable")]
    pub executable: String,
    /// Directory holding the `<workflow>.nf` scripts.
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    /// JVM options exported as `NXF_OPTS`.
    #[serde(default = "default_java_opts")]
    pub java_opts: Option<String>,
}

/// Helper tools used outside the engine.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ToolsConfig {
    /// Perl script loading ENA metadata into the catalog.
    #[serde(default)]
    pub load_from_ena: Option<PathBuf>,
    /// Interpreter for `load_from_ena`.
    #[serde(default = "default_perl")]
    pub perl: String,
    /// VEP installation.
    #[serde(default)]
    pub vep_path: Option<PathBuf>,
    /// Variant pipeline properties file.
    #[serde(default)]
    pub eva_pipeline_props: Option<PathBuf>,
    /// Where reference genomes are downloaded for remapping.
    #[serde(default)]
    pub genome_assembly_dir: Option<PathBuf>,
}

fn default_engine_executable() -> String {
    "nextflow".to_string()
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from("workflows")
}

#[allow(clippy::unnecessary_wraps)]
fn default_java_opts() -> Option<String> {
    Some("-Xms1g -Xmx8g".to_string())
}

fn default_perl() -> String {
    "perl".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: default_engine_executable(),
            workflows_dir: default_workflows_dir(),
            java_opts: default_java_opts(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            load_from_ena: None,
            perl: default_perl(),
            vep_path: None,
            eva_pipeline_props: None,
            genome_assembly_dir: None,
        }
    }
}

impl IngestConfig {
    /// Settings the external workflow runner needs.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            workflows_dir: self.engine.workflows_dir.clone(),
            java_opts: self.engine.java_opts.clone(),
        }
    }
}

/// Configuration file structure supporting profiles.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    /// Projects directory.
    pub projects_dir: Option<PathBuf>,
    /// Public FTP directory.
    pub public_ftp_dir: Option<PathBuf>,
    /// Named profiles that override the top-level settings.
    #[serde(default)]
    pub profiles: HashMap<String, ProfileSection>,
    /// Engine section.
    #[serde(default)]
    pub engine: EngineSection,
    /// Tools section.
    #[serde(default)]
    pub tools: ToolsSection,
    /// Executables table.
    #[serde(default)]
    pub executables: BTreeMap<String, String>,
    /// Jars table.
    #[serde(default)]
    pub jars: BTreeMap<String, String>,
}

/// `[engine]` as written in a file; every key optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct EngineSection {
    /// Engine executable.
    pub executable: Option<String>,
    /// Workflow scripts directory.
    pub workflows_dir: Option<PathBuf>,
    /// JVM options.
    pub java_opts: Option<String>,
}

/// `[tools]` as written in a file; every key optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ToolsSection {
    /// ENA loader script.
    pub load_from_ena: Option<PathBuf>,
    /// Perl interpreter.
    pub perl: Option<String>,
    /// VEP installation.
    pub vep_path: Option<PathBuf>,
    /// Variant pipeline properties file.
    pub eva_pipeline_props: Option<PathBuf>,
    /// Genome download directory.
    pub genome_assembly_dir: Option<PathBuf>,
}

/// Profile-specific settings that can override defaults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ProfileSection {
    /// Projects directory (overrides top-level).
    pub projects_dir: Option<PathBuf>,
    /// Public FTP directory (overrides top-level).
    pub public_ftp_dir: Option<PathBuf>,
    /// Engine executable (overrides `[engine]`).
    pub engine_executable: Option<String>,
}

/// Information about which config files were loaded.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// User-level config path (~/.config/eload-ingest/config.toml)
    pub user_config: Option<PathBuf>,
    /// Whether user config exists
    pub user_config_exists: bool,
    /// Project-level config path (.eload-ingest.toml)
    pub project_config: Option<PathBuf>,
    /// Whether project config exists
    pub project_config_exists: bool,
    /// Custom config path (from --config flag)
    pub custom_config: Option<PathBuf>,
    /// Whether custom config exists
    pub custom_config_exists: bool,
}

impl ConfigFile {
    /// Get resolved configuration for a given profile.
    /// Profile settings override the top-level settings.
    #[must_use]
    pub fn resolve(&self, profile: Option<&str>) -> IngestConfig {
        let engine_defaults = EngineConfig::default();
        let tools_defaults = ToolsConfig::default();
        let mut config = IngestConfig {
            projects_dir: self.projects_dir.clone().unwrap_or_default(),
            public_ftp_dir: self.public_ftp_dir.clone(),
            engine: EngineConfig {
                executable: self
                    .engine
                    .executable
                    .clone()
                    .unwrap_or(engine_defaults.executable),
                workflows_dir: self
                    .engine
                    .workflows_dir
                    .clone()
                    .unwrap_or(engine_defaults.workflows_dir),
                java_opts: self
                    .engine
                    .java_opts
                    .clone()
                    .or(engine_defaults.java_opts),
            },
            tools: ToolsConfig {
                load_from_ena: self.tools.load_from_ena.clone(),
                perl: self.tools.perl.clone().unwrap_or(tools_defaults.perl),
                vep_path: self.tools.vep_path.clone(),
                eva_pipeline_props: self.tools.eva_pipeline_props.clone(),
                genome_assembly_dir: self.tools.genome_assembly_dir.clone(),
            },
            executables: self.executables.clone(),
            jars: self.jars.clone(),
        };

        if let Some(profile_name) = profile {
            if let Some(profile_section) = self.profiles.get(profile_name) {
                if let Some(ref projects_dir) = profile_section.projects_dir {
                    config.projects_dir.clone_from(projects_dir);
                }
                if profile_section.public_ftp_dir.is_some() {
                    config
                        .public_ftp_dir
                        .clone_from(&profile_section.public_ftp_dir);
                }
                if let Some(ref executable) = profile_section.engine_executable {
                    config.engine.executable.clone_from(executable);
                }
            }
        }

        config
    }
}

impl ConfigSources {
    /// Discover config file locations.
    #[must_use]
    pub fn discover() -> Self {
        let user_config = get_user_config_path();
        let user_config_exists = user_config.as_ref().is_some_and(|p| p.exists());

        let project_config = get_project_config_path();
        let project_config_exists = project_config.exists();

        Self {
            user_config,
            user_config_exists,
            project_config: Some(project_config),
            project_config_exists,
            custom_config: None,
            custom_config_exists: false,
        }
    }

    /// Add a custom config path.
    #[must_use]
    pub fn with_custom_config(mut self, path: Option<PathBuf>) -> Self {
        if let Some(p) = path {
            self.custom_config_exists = p.exists();
            self.custom_config = Some(p);
        }
        self
    }
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// Failed to read configuration file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A profile was requested that no config file defines.
    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),
}

/// Get the user-level config path (~/.config/eload-ingest/config.toml).
#[must_use]
pub fn get_user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("eload-ingest").join("config.toml"))
}

/// Get the project-level config path (.eload-ingest.toml in current directory).
#[must_use]
pub fn get_project_config_path() -> PathBuf {
    PathBuf::from(".eload-ingest.toml")
}

/// Load configuration from a TOML string.
///
/// # Errors
/// Returns `ConfigError::TomlParse` if the TOML is invalid.
pub fn load_from_str(toml_content: &str) -> Result<ConfigFile, ConfigError> {
    let config: ConfigFile = toml::from_str(toml_content)?;
    Ok(config)
}

/// Load configuration from a file path.
///
/// # Errors
/// Returns `ConfigError::Io` if the file cannot be read, or
/// `ConfigError::TomlParse` if the TOML is invalid.
pub fn load_from_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&content)
}

/// Load configuration with the specified profile and optional custom config path.
///
/// Resolution order (highest to lowest priority):
/// 1. CLI flags (handled by caller after this function returns)
/// 2. Environment variables (`ELOAD_INGEST_*`)
/// 3. Profile-specific settings (if profile specified)
/// 4. Project-level `.eload-ingest.toml`
/// 5. User-level `~/.config/eload-ingest/config.toml`
/// 6. Built-in defaults
///
/// # Errors
/// Returns an error if a config file exists but cannot be parsed, or if the
/// requested profile is not defined anywhere.
pub fn load_config(
    profile: Option<&str>,
    custom_config: Option<&PathBuf>,
) -> Result<IngestConfig, ConfigError> {
    let mut merged = ConfigFile::default();

    // 1. Load user-level config (lowest priority file)
    if let Some(user_path) = get_user_config_path() {
        if user_path.exists() {
            let user_config = load_from_file(&user_path)?;
            merge_config_file(&mut merged, &user_config);
        }
    }

    // 2. Load project-level config (higher priority)
    let project_path = get_project_config_path();
    if project_path.exists() {
        let project_config = load_from_file(&project_path)?;
        merge_config_file(&mut merged, &project_config);
    }

    // 3. Load custom config if specified (highest file priority)
    if let Some(custom_path) = custom_config {
        let custom = load_from_file(custom_path)?;
        merge_config_file(&mut merged, &custom);
    }

    if let Some(name) = profile {
        if !merged.profiles.contains_key(name) {
            return Err(ConfigError::UnknownProfile(name.to_string()));
        }
    }

    let mut config = merged.resolve(profile);

    // 4. Apply environment variables (highest priority, overrides files)
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Merge a config file into the base config (later values override earlier).
fn merge_config_file(base: &mut ConfigFile, overlay: &ConfigFile) {
    if overlay.projects_dir.is_some() {
        base.projects_dir.clone_from(&overlay.projects_dir);
    }
    if overlay.public_ftp_dir.is_some() {
        base.public_ftp_dir.clone_from(&overlay.public_ftp_dir);
    }

    // Overlay profiles take precedence
    for (name, profile) in &overlay.profiles {
        base.profiles.insert(name.clone(), profile.clone());
    }

    if overlay.engine.executable.is_some() {
        base.engine.executable.clone_from(&overlay.engine.executable);
    }
    if overlay.engine.workflows_dir.is_some() {
        base.engine
            .workflows_dir
            .clone_from(&overlay.engine.workflows_dir);
    }
    if overlay.engine.java_opts.is_some() {
        base.engine.java_opts.clone_from(&overlay.engine.java_opts);
    }

    if overlay.tools.load_from_ena.is_some() {
        base.tools
            .load_from_ena
            .clone_from(&overlay.tools.load_from_ena);
    }
    if overlay.tools.perl.is_some() {
        base.tools.perl.clone_from(&overlay.tools.perl);
    }
    if overlay.tools.vep_path.is_some() {
        base.tools.vep_path.clone_from(&overlay.tools.vep_path);
    }
    if overlay.tools.eva_pipeline_props.is_some() {
        base.tools
            .eva_pipeline_props
            .clone_from(&overlay.tools.eva_pipeline_props);
    }
    if overlay.tools.genome_assembly_dir.is_some() {
        base.tools
            .genome_assembly_dir
            .clone_from(&overlay.tools.genome_assembly_dir);
    }

    // Tables merge key by key
    for (name, value) in &overlay.executables {
        base.executables.insert(name.clone(), value.clone());
    }
    for (name, value) in &overlay.jars {
        base.jars.insert(name.clone(), value.clone());
    }
}

/// Apply environment variable overrides (highest priority).
fn apply_env_overrides(config: &mut IngestConfig) {
    apply_overrides_from(config, |key| env::var(key).ok());
}

/// Apply `ELOAD_INGEST_*` overrides read through `lookup`.
fn apply_overrides_from<F>(config: &mut IngestConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("ELOAD_INGEST_PROJECTS_DIR") {
        config.projects_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("ELOAD_INGEST_PUBLIC_FTP_DIR") {
        config.public_ftp_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("ELOAD_INGEST_NEXTFLOW") {
        config.engine.executable = val;
    }
    if let Some(val) = lookup("ELOAD_INGEST_WORKFLOWS_DIR") {
        config.engine.workflows_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("ELOAD_INGEST_JAVA_OPTS") {
        // Empty disables NXF_OPTS
        config.engine.java_opts = Some(val).filter(|v| !v.is_empty());
    }
    if let Some(val) = lookup("ELOAD_INGEST_LOAD_FROM_ENA") {
        config.tools.load_from_ena = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("ELOAD_INGEST_VEP_PATH") {
        config.tools.vep_path = Some(PathBuf::from(val));
    }
}

/// Validate the configuration.
///
/// Returns a list of validation errors (empty if valid).
#[must_use]
pub fn validate_config(config: &IngestConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.projects_dir.as_os_str().is_empty() {
        errors.push(
            "projects_dir: not configured (set ELOAD_INGEST_PROJECTS_DIR or add to config file)"
                .to_string(),
        );
    }

    if config.engine.executable.trim().is_empty() {
        errors.push("engine.executable: must not be empty".to_string());
    }

    if !config.engine.workflows_dir.is_dir() {
        errors.push(format!(
            "engine.workflows_dir: directory '{}' not found",
            config.engine.workflows_dir.display()
        ));
    }

    if let Some(ref script) = config.tools.load_from_ena {
        if !script.is_file() {
            errors.push(format!(
                "tools.load_from_ena: file '{}' not found",
                script.display()
            ));
        }
    }

    if config.public_ftp_dir.is_none() {
        errors.push(
            "public_ftp_dir: not configured (required by the accession stage)".to_string(),
        );
    }

    errors
}

fn quoted(path: Option<&Path>) -> String {
    path.map_or_else(
        || "(not set)".to_string(),
        |p| format!("\"{}\"", p.display()),
    )
}

/// Format the configuration for display.
#[must_use]
pub fn format_config(config: &IngestConfig, sources: &ConfigSources) -> String {
    let mut output = String::new();

    output.push_str("# Resolved Configuration\n\n");

    let projects_dir =
        Some(config.projects_dir.as_path()).filter(|p| !p.as_os_str().is_empty());
    let _ = writeln!(output, "projects_dir = {}", quoted(projects_dir));
    let _ = writeln!(
        output,
        "public_ftp_dir = {}",
        quoted(config.public_ftp_dir.as_deref())
    );

    output.push_str("\n[engine]\n");
    let _ = writeln!(output, "executable = \"{}\"", config.engine.executable);
    let _ = writeln!(
        output,
        "workflows_dir = \"{}\"",
        config.engine.workflows_dir.display()
    );
    let _ = writeln!(
        output,
        "java_opts = {}",
        config
            .engine
            .java_opts
            .as_ref()
            .map_or_else(|| "(not set)".to_string(), |o| format!("\"{o}\""))
    );

    output.push_str("\n[tools]\n");
    let _ = writeln!(
        output,
        "load_from_ena = {}",
        quoted(config.tools.load_from_ena.as_deref())
    );
    let _ = writeln!(output, "perl = \"{}\"", config.tools.perl);
    let _ = writeln!(output, "vep_path = {}", quoted(config.tools.vep_path.as_deref()));
    let _ = writeln!(
        output,
        "eva_pipeline_props = {}",
        quoted(config.tools.eva_pipeline_props.as_deref())
    );
    let _ = writeln!(
        output,
        "genome_assembly_dir = {}",
        quoted(config.tools.genome_assembly_dir.as_deref())
    );

    for (title, table) in [("executables", &config.executables), ("jars", &config.jars)] {
        if !table.is_empty() {
            let _ = writeln!(output, "\n[{title}]");
            for (name, value) in table {
                let _ = writeln!(output, "{name} = \"{value}\"");
            }
        }
    }

    output.push_str("\n# Sources\n");
    for (label, path, exists) in [
        ("user", &sources.user_config, sources.user_config_exists),
        ("project", &sources.project_config, sources.project_config_exists),
        ("custom", &sources.custom_config, sources.custom_config_exists),
    ] {
        if let Some(path) = path {
            if exists {
                let _ = writeln!(output, "# {label}: {}", path.display());
            }
        }
    }

    output
}

/// Format config file paths for display.
#[must_use]
pub fn format_config_paths(sources: &ConfigSources) -> String {
    let mut output = String::new();

    output.push_str("Configuration file locations:\n\n");

    if let Some(ref path) = sources.user_config {
        let _ = writeln!(
            output,
            "User config:    {} {}",
            path.display(),
            if sources.user_config_exists {
                "(exists)"
            } else {
                "(not found)"
            }
        );
    } else {
        output.push_str("User config:    (could not determine config directory)\n");
    }

    if let Some(ref path) = sources.project_config {
        let _ = writeln!(
            output,
            "Project config: {} {}",
            path.display(),
            if sources.project_config_exists {
                "(exists)"
            } else {
                "(not found)"
            }
        );
    }

    if let Some(ref path) = sources.custom_config {
        let _ = writeln!(
            output,
            "Custom config:  {} {}",
            path.display(),
            if sources.custom_config_exists {
                "(exists)"
            } else {
                "(not found)"
            }
        );
    }

    output.push_str("\nPriority order (highest first):\n");
    output.push_str("  1. CLI flags (--projects-dir, etc.)\n");
    output.push_str("  2. Environment variables (ELOAD_INGEST_*)\n");
    output.push_str("  3. Custom config (if --config specified)\n");
    output.push_str("  4. Project config (.eload-ingest.toml)\n");
    output.push_str("  5. User config (~/.config/eload-ingest/config.toml)\n");
    output.push_str("  6. Built-in defaults\n");

    output
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    // =========================================================================
    // Config struct tests
    // =========================================================================

    #[test]
    fn test_config_default_values() {
        let config = IngestConfig::default();
        assert_eq!(config.engine.executable, "nextflow");
        assert_eq!(config.engine.java_opts.as_deref(), Some("-Xms1g -Xmx8g"));
        assert_eq!(config.tools.perl, "perl");
        assert!(config.projects_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_config_deserialize_full() {
        let toml_content = r#"
projects_dir = "/nfs/eva/projects"
public_ftp_dir = "/nfs/ftp/public"

[engine]
executable = "/opt/nextflow"
workflows_dir = "/opt/workflows"
java_opts = "-Xmx4g"

[tools]
load_from_ena = "/opt/load_from_ena.pl"
vep_path = "/opt/vep"

[executables]
bcftools = "/usr/bin/bcftools"

[jars]
accession_pipeline = "/opt/accession.jar"

[profiles.dev]
projects_dir = "/tmp/projects"
engine_executable = "/usr/local/bin/nextflow"
"#;
        let config_file = load_from_str(toml_content).expect("should parse full config");
        let config = config_file.resolve(None);

        assert_eq!(config.projects_dir, PathBuf::from("/nfs/eva/projects"));
        assert_eq!(config.engine.executable, "/opt/nextflow");
        assert_eq!(config.engine.java_opts.as_deref(), Some("-Xmx4g"));
        assert_eq!(config.tools.vep_path, Some(PathBuf::from("/opt/vep")));
        assert_eq!(config.tools.perl, "perl");
        assert_eq!(
            config.executables.get("bcftools").map(String::as_str),
            Some("/usr/bin/bcftools")
        );
        assert_eq!(config.jars.len(), 1);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(matches!(
            load_from_str("projects_dir = ["),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_engine_settings_from_config() {
        let config = IngestConfig::default();
        let settings = config.engine_settings();
        assert_eq!(settings.workflows_dir, PathBuf::from("workflows"));
        assert_eq!(settings.java_opts.as_deref(), Some("-Xms1g -Xmx8g"));
    }

    // =========================================================================
    // Profile tests
    // =========================================================================

    #[test]
    fn test_profile_overrides_top_level() {
        let config_file = load_from_str(
            r#"
projects_dir = "/prod"

[engine]
executable = "/opt/nextflow"

[profiles.dev]
projects_dir = "/dev"
engine_executable = "nf-dev"
"#,
        )
        .unwrap();

        let dev = config_file.resolve(Some("dev"));
        assert_eq!(dev.projects_dir, PathBuf::from("/dev"));
        assert_eq!(dev.engine.executable, "nf-dev");

        let missing = config_file.resolve(Some("staging"));
        assert_eq!(missing.projects_dir, PathBuf::from("/prod"));
    }

    // =========================================================================
    // Merge tests
    // =========================================================================

    #[test]
    fn test_merge_overlay_wins_and_tables_combine() {
        let mut base = load_from_str(
            r#"
projects_dir = "/user"
[engine]
java_opts = "-Xmx1g"
[jars]
a = "/a.jar"
"#,
        )
        .unwrap();
        let overlay = load_from_str(
            r#"
projects_dir = "/project"
[jars]
b = "/b.jar"
"#,
        )
        .unwrap();

        merge_config_file(&mut base, &overlay);
        let config = base.resolve(None);
        assert_eq!(config.projects_dir, PathBuf::from("/project"));
        assert_eq!(config.engine.java_opts.as_deref(), Some("-Xmx1g"));
        assert_eq!(config.jars.len(), 2);
    }

    // =========================================================================
    // Environment override tests
    // =========================================================================

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ELOAD_INGEST_PROJECTS_DIR", "/env/projects"),
            ("ELOAD_INGEST_NEXTFLOW", "/env/nextflow"),
            ("ELOAD_INGEST_JAVA_OPTS", ""),
        ]
        .into_iter()
        .collect();
        let mut config = IngestConfig::default();

        apply_overrides_from(&mut config, |key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.projects_dir, PathBuf::from("/env/projects"));
        assert_eq!(config.engine.executable, "/env/nextflow");
        assert!(config.engine.java_opts.is_none());
        assert!(config.tools.vep_path.is_none());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_validate_reports_every_problem() {
        let config = IngestConfig {
            engine: EngineConfig {
                executable: " ".to_string(),
                workflows_dir: PathBuf::from("/nonexistent/workflows"),
                java_opts: None,
            },
            ..IngestConfig::default()
        };
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 4);
        assert!(errors[0].starts_with("projects_dir"));
        assert!(errors.iter().any(|e| e.starts_with("engine.workflows_dir")));
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            projects_dir: dir.path().to_path_buf(),
            public_ftp_dir: Some(dir.path().join("ftp")),
            engine: EngineConfig {
                workflows_dir: dir.path().to_path_buf(),
                ..EngineConfig::default()
            },
            ..IngestConfig::default()
        };
        assert!(validate_config(&config).is_empty());
    }

    // =========================================================================
    // Formatting tests
    // =========================================================================

    #[test]
    fn test_format_config_shows_unset_values() {
        let output = format_config(&IngestConfig::default(), &ConfigSources::default());
        assert!(output.contains("projects_dir = (not set)"));
        assert!(output.contains("executable = \"nextflow\""));
        assert!(!output.contains("[jars]"));
    }

    #[test]
    fn test_format_config_paths_lists_priority() {
        let sources =
            ConfigSources::default().with_custom_config(Some(PathBuf::from("/nope.toml")));
        let output = format_config_paths(&sources);
        assert!(output.contains("Custom config:  /nope.toml (not found)"));
        assert!(output.contains("ELOAD_INGEST_*"));
    }
}
