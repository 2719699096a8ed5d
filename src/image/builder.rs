//! Image builder - builds images from build descriptors
//!
//! A build descriptor is a Dockerfile-compatible file describing a base
//! image, build arguments, copy/install steps, and the process entry
//! command. Values fixed here are baked into the image and cannot change
//! without a rebuild.

use crate::appconfig::{AppRuntimeConfig, APP_CONFIG_FILE};
use crate::error::{Result, StackupError};
use crate::image::store::{Image, ImageConfig, ImageStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default build file name
pub const DEFAULT_BUILD_FILE: &str = "Dockerfile";

/// Alternative build file name
pub const ALT_BUILD_FILE: &str = "Containerfile";

/// Build context for image building
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Context directory
    pub context_dir: PathBuf,
    /// Build file path
    pub build_file: PathBuf,
    /// Build arguments
    pub build_args: HashMap<String, String>,
    /// Tags for the built image
    pub tags: Vec<String>,
}

impl BuildContext {
    /// Create a new build context
    pub fn new(context_dir: PathBuf) -> Self {
        let build_file = if context_dir.join(DEFAULT_BUILD_FILE).exists() {
            context_dir.join(DEFAULT_BUILD_FILE)
        } else if context_dir.join(ALT_BUILD_FILE).exists() {
            context_dir.join(ALT_BUILD_FILE)
        } else {
            context_dir.join(DEFAULT_BUILD_FILE)
        };

        Self {
            context_dir,
            build_file,
            build_args: HashMap::new(),
            tags: Vec::new(),
        }
    }

    /// Set build file path
    pub fn build_file(mut self, path: PathBuf) -> Self {
        self.build_file = path;
        self
    }

    /// Add build argument
    pub fn arg(mut self, key: &str, value: &str) -> Self {
        self.build_args.insert(key.to_string(), value.to_string());
        self
    }

    /// Add tag
    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }
}

/// Parsed build instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BuildInstruction {
    /// FROM instruction - base image with pinned version
    From {
        image: String,
        tag: Option<String>,
        alias: Option<String>,
    },
    /// ARG instruction - build argument
    Arg {
        name: String,
        default: Option<String>,
    },
    /// ENV instruction - bake environment variable into the image
    Env { key: String, value: String },
    /// RUN instruction - install/compile step
    Run { command: String, shell: bool },
    /// COPY instruction - copy files into the image
    Copy {
        src: Vec<String>,
        dest: String,
        from: Option<String>,
    },
    /// WORKDIR instruction - set working directory
    Workdir { path: String },
    /// EXPOSE instruction - declare listening port
    Expose { port: u16, protocol: String },
    /// CMD instruction - process entry command
    Cmd { command: Vec<String>, shell: bool },
    /// ENTRYPOINT instruction
    Entrypoint { command: Vec<String>, shell: bool },
}

/// Parsed build file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedBuildFile {
    /// Build stages
    pub stages: Vec<BuildStage>,
}

/// Build stage (for multi-stage builds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildStage {
    /// Stage name/alias
    pub name: Option<String>,
    /// Base image
    pub base_image: String,
    /// Base image tag
    pub base_tag: Option<String>,
    /// Instructions in this stage
    pub instructions: Vec<BuildInstruction>,
}

/// Image builder
pub struct ImageBuilder {
    /// Build context
    context: BuildContext,
}

impl ImageBuilder {
    /// Create a new image builder
    pub fn new(context: BuildContext) -> Self {
        Self { context }
    }

    /// Parse a build file
    pub fn parse_build_file(path: &Path) -> Result<ParsedBuildFile> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StackupError::Build(format!("{}: {}", path.display(), e)))?;
        Self::parse_build_content(&content)
    }

    /// Parse build file content
    pub fn parse_build_content(content: &str) -> Result<ParsedBuildFile> {
        let mut stages = Vec::new();
        let mut current_stage: Option<BuildStage> = None;
        let mut continued_line = String::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // Handle line continuation
            if let Some(line_without_backslash) = line.strip_suffix('\\') {
                continued_line.push_str(line_without_backslash);
                continued_line.push(' ');
                continue;
            }

            let full_line = if !continued_line.is_empty() {
                let result = format!("{}{}", continued_line, line);
                continued_line.clear();
                result
            } else {
                line.to_string()
            };

            let instruction = Self::parse_instruction(&full_line, line_num + 1)?;

            match instruction {
                BuildInstruction::From { image, tag, alias } => {
                    if let Some(stage) = current_stage.take() {
                        stages.push(stage);
                    }

                    current_stage = Some(BuildStage {
                        name: alias,
                        base_image: image,
                        base_tag: tag,
                        instructions: Vec::new(),
                    });
                }
                _ => {
                    if let Some(ref mut stage) = current_stage {
                        stage.instructions.push(instruction);
                    } else {
                        return Err(StackupError::BuildFileParse {
                            line: line_num + 1,
                            message: "Instruction before FROM".to_string(),
                        });
                    }
                }
            }
        }

        if let Some(stage) = current_stage {
            stages.push(stage);
        }

        if stages.is_empty() {
            return Err(StackupError::BuildFileParse {
                line: 0,
                message: "No FROM instruction found".to_string(),
            });
        }

        Ok(ParsedBuildFile { stages })
    }

    /// Parse a single instruction
    fn parse_instruction(line: &str, line_num: usize) -> Result<BuildInstruction> {
        let parts: Vec<&str> = line.splitn(2, char::is_whitespace).collect();
        let instruction = parts[0].to_uppercase();
        let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

        match instruction.as_str() {
            "FROM" => Self::parse_from(args, line_num),
            "ARG" => Self::parse_arg(args),
            "ENV" => Self::parse_env(args, line_num),
            "RUN" => Self::parse_run(args),
            "COPY" => Self::parse_copy(args),
            "WORKDIR" => Ok(BuildInstruction::Workdir {
                path: args.to_string(),
            }),
            "EXPOSE" => Self::parse_expose(args, line_num),
            "CMD" => Self::parse_cmd(args),
            "ENTRYPOINT" => Self::parse_entrypoint(args),
            _ => Err(StackupError::BuildFileParse {
                line: line_num,
                message: format!("Unknown instruction: {}", instruction),
            }),
        }
    }

    fn parse_from(args: &str, line_num: usize) -> Result<BuildInstruction> {
        let parts: Vec<&str> = args.split_whitespace().collect();
        if parts.is_empty() {
            return Err(StackupError::BuildFileParse {
                line: line_num,
                message: "FROM requires an image".to_string(),
            });
        }

        let image_parts: Vec<&str> = parts[0].splitn(2, ':').collect();
        let image = image_parts[0].to_string();
        let tag = image_parts.get(1).map(|s| s.to_string());

        let alias = if parts.len() >= 3 && parts[1].to_uppercase() == "AS" {
            Some(parts[2].to_string())
        } else {
            None
        };

        Ok(BuildInstruction::From { image, tag, alias })
    }

    fn parse_arg(args: &str) -> Result<BuildInstruction> {
        if let Some(eq_pos) = args.find('=') {
            Ok(BuildInstruction::Arg {
                name: args[..eq_pos].trim().to_string(),
                default: Some(args[eq_pos + 1..].trim().to_string()),
            })
        } else {
            Ok(BuildInstruction::Arg {
                name: args.trim().to_string(),
                default: None,
            })
        }
    }

    fn parse_env(args: &str, line_num: usize) -> Result<BuildInstruction> {
        // Support both ENV key=value and ENV key value
        if let Some(eq_pos) = args.find('=') {
            let key = args[..eq_pos].trim().to_string();
            let value = args[eq_pos + 1..].trim().trim_matches('"').to_string();
            Ok(BuildInstruction::Env { key, value })
        } else {
            let parts: Vec<&str> = args.splitn(2, char::is_whitespace).collect();
            if parts.len() < 2 {
                return Err(StackupError::BuildFileParse {
                    line: line_num,
                    message: "ENV requires a key and value".to_string(),
                });
            }
            Ok(BuildInstruction::Env {
                key: parts[0].to_string(),
                value: parts[1].trim().to_string(),
            })
        }
    }

    fn parse_run(args: &str) -> Result<BuildInstruction> {
        if args.starts_with('[') {
            // Exec form
            Ok(BuildInstruction::Run {
                command: args.to_string(),
                shell: false,
            })
        } else {
            // Shell form
            Ok(BuildInstruction::Run {
                command: args.to_string(),
                shell: true,
            })
        }
    }

    fn parse_copy(args: &str) -> Result<BuildInstruction> {
        let mut from = None;
        let mut remaining = args;

        if let Some(rest) = remaining.strip_prefix("--from=") {
            let end = rest.find(' ').unwrap_or(rest.len());
            from = Some(rest[..end].to_string());
            remaining = rest[end..].trim();
        }

        let parts: Vec<&str> = remaining.split_whitespace().collect();
        if parts.len() < 2 {
            return Ok(BuildInstruction::Copy {
                src: vec![],
                dest: String::new(),
                from,
            });
        }

        let dest = parts[parts.len() - 1].to_string();
        let src: Vec<String> = parts[..parts.len() - 1]
            .iter()
            .map(|s| s.to_string())
            .collect();

        Ok(BuildInstruction::Copy { src, dest, from })
    }

    fn parse_expose(args: &str, line_num: usize) -> Result<BuildInstruction> {
        let parts: Vec<&str> = args.split('/').collect();
        let port: u16 = parts[0].parse().map_err(|_| StackupError::BuildFileParse {
            line: line_num,
            message: format!("Invalid port number: {}", parts[0]),
        })?;
        let protocol = parts.get(1).unwrap_or(&"tcp").to_string();

        Ok(BuildInstruction::Expose { port, protocol })
    }

    fn parse_cmd(args: &str) -> Result<BuildInstruction> {
        if args.starts_with('[') {
            let command: Vec<String> = serde_json::from_str(args).unwrap_or_default();
            Ok(BuildInstruction::Cmd {
                command,
                shell: false,
            })
        } else {
            Ok(BuildInstruction::Cmd {
                command: vec![args.to_string()],
                shell: true,
            })
        }
    }

    fn parse_entrypoint(args: &str) -> Result<BuildInstruction> {
        if args.starts_with('[') {
            let command: Vec<String> = serde_json::from_str(args).unwrap_or_default();
            Ok(BuildInstruction::Entrypoint {
                command,
                shell: false,
            })
        } else {
            Ok(BuildInstruction::Entrypoint {
                command: vec![args.to_string()],
                shell: true,
            })
        }
    }

    /// Resolve declared build arguments against supplied values
    fn resolve_build_args(
        parsed: &ParsedBuildFile,
        supplied: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut resolved = HashMap::new();

        for stage in &parsed.stages {
            for instruction in &stage.instructions {
                if let BuildInstruction::Arg { name, default } = instruction {
                    let value = supplied.get(name).cloned().or_else(|| default.clone());
                    if let Some(v) = value {
                        resolved.insert(name.clone(), v);
                    }
                }
            }
        }

        for name in supplied.keys() {
            if !resolved.contains_key(name) {
                tracing::warn!("Build argument {} is not declared in the build file", name);
            }
        }

        resolved
    }

    /// Build an image from the build context
    ///
    /// The final stage determines the image configuration. Build arguments
    /// and `app.config.json` env selections are resolved here, once; the
    /// result is immutable until the next build.
    pub async fn build(&self, store: &ImageStore) -> Result<String> {
        let parsed = Self::parse_build_file(&self.context.build_file)?;
        let args = Self::resolve_build_args(&parsed, &self.context.build_args);

        let stage = parsed
            .stages
            .last()
            .ok_or_else(|| StackupError::Build("Build file has no stages".to_string()))?;

        let mut config = ImageConfig::default();

        for instruction in &stage.instructions {
            match instruction {
                BuildInstruction::Env { key, value } => {
                    config.env.insert(key.clone(), substitute_args(value, &args));
                }
                BuildInstruction::Workdir { path } => {
                    config.working_dir = substitute_args(path, &args);
                }
                BuildInstruction::Expose { port, protocol } => {
                    config.exposed_ports.push(format!("{}/{}", port, protocol));
                }
                BuildInstruction::Cmd { command, shell } => {
                    config.cmd = command_argv(command, *shell, &args);
                }
                BuildInstruction::Entrypoint { command, shell } => {
                    config.entrypoint = command_argv(command, *shell, &args);
                }
                BuildInstruction::From { .. }
                | BuildInstruction::Arg { .. }
                | BuildInstruction::Run { .. }
                | BuildInstruction::Copy { .. } => {}
            }
        }

        // Pick up the frontend runtime configuration if the context has one
        let app_config_path = self.context.context_dir.join(APP_CONFIG_FILE);
        if app_config_path.exists() {
            let app_config = AppRuntimeConfig::from_file(&app_config_path)?;
            let mut build_env = args.clone();
            build_env.extend(config.env.clone());
            config.env.extend(app_config.resolve_env(&build_env));
        }

        let image_id = uuid::Uuid::new_v4().to_string().replace("-", "")[..12].to_string();

        let image = Image {
            id: image_id.clone(),
            repo_tags: self.context.tags.clone(),
            created: chrono::Utc::now(),
            config,
            build_args: args,
            stage_count: parsed.stages.len(),
        };

        store.insert(image)?;

        tracing::info!(
            "Built image {} from {} with {} stages",
            image_id,
            self.context.build_file.display(),
            parsed.stages.len()
        );

        Ok(image_id)
    }
}

/// Turn a CMD/ENTRYPOINT into an argv, wrapping shell form
fn command_argv(command: &[String], shell: bool, args: &HashMap<String, String>) -> Vec<String> {
    let command: Vec<String> = command.iter().map(|c| substitute_args(c, args)).collect();

    if shell {
        vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            command.join(" "),
        ]
    } else {
        command
    }
}

/// Substitute `${NAME}` and `$NAME` build-argument references
fn substitute_args(value: &str, args: &HashMap<String, String>) -> String {
    let mut result = value.to_string();

    for (key, arg_value) in args {
        result = result.replace(&format!("${{{}}}", key), arg_value);
        result = result.replace(&format!("${}", key), arg_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FRONTEND_BUILD_FILE: &str = r#"
FROM node:18-alpine

WORKDIR /app

ARG NEXT_PUBLIC_API_URL
ENV NEXT_PUBLIC_API_URL=${NEXT_PUBLIC_API_URL}

COPY package.json package-lock.json ./
RUN npm ci

COPY . .
RUN npm run build

EXPOSE 3000

CMD ["npm", "run", "start"]
"#;

    #[test]
    fn test_parse_frontend_build_file() {
        let parsed = ImageBuilder::parse_build_content(FRONTEND_BUILD_FILE).unwrap();
        assert_eq!(parsed.stages.len(), 1);
        assert_eq!(parsed.stages[0].base_image, "node");
        assert_eq!(parsed.stages[0].base_tag, Some("18-alpine".to_string()));
        assert_eq!(parsed.stages[0].instructions.len(), 9);
    }

    #[test]
    fn test_parse_multistage_build() {
        let content = r#"
FROM node:18-alpine AS builder
WORKDIR /app
COPY . .
RUN npm ci && npm run build

FROM node:18-alpine
COPY --from=builder /app/.next /app/.next
CMD ["npm", "run", "start"]
"#;

        let parsed = ImageBuilder::parse_build_content(content).unwrap();
        assert_eq!(parsed.stages.len(), 2);
        assert_eq!(parsed.stages[0].name, Some("builder".to_string()));
        assert!(matches!(
            parsed.stages[1].instructions[0],
            BuildInstruction::Copy { from: Some(ref f), .. } if f == "builder"
        ));
    }

    #[test]
    fn test_instruction_before_from_rejected() {
        let result = ImageBuilder::parse_build_content("ENV FOO=bar\nFROM node:18");
        assert!(matches!(
            result,
            Err(StackupError::BuildFileParse { line: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_instruction_rejected() {
        let result = ImageBuilder::parse_build_content("FROM node:18\nTELEPORT /app");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_bakes_build_argument() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("Dockerfile"), FRONTEND_BUILD_FILE).unwrap();

        let store = ImageStore::new();
        let context = BuildContext::new(temp.path().to_path_buf())
            .tag("demo-frontend:latest")
            .arg("NEXT_PUBLIC_API_URL", "http://localhost:8000");

        ImageBuilder::new(context).build(&store).await.unwrap();

        let image = store.get_by_tag("demo-frontend:latest").unwrap();
        assert_eq!(
            image.config.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://localhost:8000")
        );
        assert_eq!(image.config.exposed_ports, vec!["3000/tcp"]);
        assert_eq!(image.config.cmd, vec!["npm", "run", "start"]);
        assert_eq!(image.config.working_dir, "/app");
    }

    #[tokio::test]
    async fn test_build_argument_immutable_until_rebuild() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("Dockerfile"), FRONTEND_BUILD_FILE).unwrap();

        let store = ImageStore::new();

        let first = ImageBuilder::new(
            BuildContext::new(temp.path().to_path_buf())
                .tag("demo-frontend:latest")
                .arg("NEXT_PUBLIC_API_URL", "http://localhost:8000"),
        )
        .build(&store)
        .await
        .unwrap();

        // The argument changed, but nothing is rebuilt yet: the image keeps
        // the value it was built with
        let image = store.get(&first).unwrap();
        assert_eq!(
            image.config.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://localhost:8000")
        );

        let second = ImageBuilder::new(
            BuildContext::new(temp.path().to_path_buf())
                .tag("demo-frontend:latest")
                .arg("NEXT_PUBLIC_API_URL", "http://api.example.com"),
        )
        .build(&store)
        .await
        .unwrap();

        let rebuilt = store.get_by_tag("demo-frontend:latest").unwrap();
        assert_eq!(rebuilt.id, second);
        assert_eq!(
            rebuilt.config.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://api.example.com")
        );

        // The original image is unchanged
        let original = store.get(&first).unwrap();
        assert_eq!(
            original.config.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://localhost:8000")
        );
    }

    #[tokio::test]
    async fn test_build_resolves_app_config_env() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("Dockerfile"), FRONTEND_BUILD_FILE).unwrap();
        std::fs::write(
            temp.path().join(APP_CONFIG_FILE),
            r#"{ "reactStrictMode": true, "env": { "NEXT_PUBLIC_API_URL": null } }"#,
        )
        .unwrap();

        let store = ImageStore::new();
        let context = BuildContext::new(temp.path().to_path_buf())
            .tag("demo-frontend:latest")
            .arg("NEXT_PUBLIC_API_URL", "http://localhost:8000");

        ImageBuilder::new(context).build(&store).await.unwrap();

        let image = store.get_by_tag("demo-frontend:latest").unwrap();
        assert_eq!(
            image.config.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://localhost:8000")
        );
    }

    #[test]
    fn test_default_build_file_name() {
        let temp = tempdir().unwrap();
        let context = BuildContext::new(temp.path().to_path_buf());
        assert!(context.build_file.ends_with(DEFAULT_BUILD_FILE));
    }
}
