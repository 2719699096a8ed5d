//! Stack orchestrator
//!
//! Brings services up in dependency order and back down in reverse.
//! Dependency order gates the start command only; readiness is each
//! service's own concern.

use super::config::{
    parse_mount, parse_port_mapping, BuildSection, MountSource, ServiceConfig, StackConfig,
};
use super::env_file;
use super::parser::StackParser;
use crate::error::{Result, StackupError};
use crate::image::{BuildContext, ImageBuilder, ImageStore};
use crate::network::ProjectNetwork;
use crate::process::{MountPoint, ProcessConfig, ProcessManager, ProcessStatus};
use crate::storage::VolumeManager;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

/// Service state, from the orchestrator's perspective
#[derive(Debug, Clone)]
pub struct ServiceState {
    /// Service name
    pub name: String,
    /// Backing process ID, if one was created
    pub process_id: Option<String>,
    /// Address on the project network
    pub address: Option<Ipv4Addr>,
    /// Current status
    pub status: ProcessStatus,
}

/// Stack orchestrator
pub struct StackOrchestrator {
    /// Project name
    project_name: String,
    /// Stack configuration
    config: StackConfig,
    /// Process manager
    processes: Arc<ProcessManager>,
    /// Image store
    images: Arc<ImageStore>,
    /// Volume manager
    volumes: Arc<VolumeManager>,
    /// Project network
    network: ProjectNetwork,
    /// Service states
    service_states: HashMap<String, ServiceState>,
    /// Project working directory
    working_dir: PathBuf,
}

impl StackOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        project_name: &str,
        config: StackConfig,
        processes: Arc<ProcessManager>,
        images: Arc<ImageStore>,
        volumes: Arc<VolumeManager>,
        working_dir: PathBuf,
    ) -> Result<Self> {
        Ok(Self {
            project_name: project_name.to_string(),
            config,
            processes,
            images,
            volumes,
            network: ProjectNetwork::new(project_name)?,
            service_states: HashMap::new(),
            working_dir,
        })
    }

    /// Start the stack
    ///
    /// Validation and dependency ordering happen before any process is
    /// created. A service whose build fails takes its dependents down with
    /// it; a service that fails to start does not - dependency is
    /// start-order, not success-order.
    pub async fn up(&mut self, rebuild: bool) -> Result<()> {
        tracing::info!("Starting stack project: {}", self.project_name);

        for warning in StackParser::validate(&self.config)? {
            tracing::warn!("{}", warning);
        }

        let order = self.start_order()?;

        // Named volumes outlive the services using them
        for volume_name in self.config.volumes.keys() {
            self.volumes.ensure(volume_name)?;
        }

        let mut build_aborted: HashSet<String> = HashSet::new();

        for service_name in order {
            let service = self
                .config
                .services
                .get(&service_name)
                .cloned()
                .ok_or_else(|| StackupError::ServiceNotFound(service_name.clone()))?;

            let deps = service.depends_on.clone().unwrap_or_default();
            if let Some(dep) = deps.iter().find(|d| build_aborted.contains(d.as_str())) {
                tracing::error!(
                    "Skipping service {}: dependency {} failed to build",
                    service_name,
                    dep
                );
                build_aborted.insert(service_name.clone());
                self.mark_failed(&service_name);
                continue;
            }

            let image_tag = match self
                .build_service_image(&service_name, &service, rebuild)
                .await
            {
                Ok(tag) => tag,
                Err(e) => {
                    tracing::error!("Build failed for service {}: {}", service_name, e);
                    build_aborted.insert(service_name.clone());
                    self.mark_failed(&service_name);
                    continue;
                }
            };

            if let Err(e) = self.start_service(&service_name, &service, image_tag.as_deref()) {
                tracing::error!("Failed to start service {}: {}", service_name, e);
                self.mark_failed(&service_name);
            }
        }

        Ok(())
    }

    /// Stop the stack
    ///
    /// Services stop in reverse start order. Volumes persist unless
    /// `remove_volumes` is set.
    pub async fn down(&mut self, remove_volumes: bool) -> Result<()> {
        tracing::info!("Stopping stack project: {}", self.project_name);

        let order = self.start_order()?;
        for service_name in order.into_iter().rev() {
            self.stop_service(&service_name);
        }

        if remove_volumes {
            for volume_name in self.config.volumes.keys() {
                if let Err(e) = self.volumes.remove(volume_name) {
                    tracing::warn!("Failed to remove volume {}: {}", volume_name, e);
                }
            }
        }

        Ok(())
    }

    /// Build images for services with a build section
    pub async fn build_images(&self, only: Option<&str>) -> Result<()> {
        if let Some(target) = only {
            let service = self
                .config
                .services
                .get(target)
                .ok_or_else(|| StackupError::ServiceNotFound(target.to_string()))?;
            self.build_service_image(target, service, true).await?;
            return Ok(());
        }

        for (name, service) in &self.config.services {
            if service.build.is_some() {
                self.build_service_image(name, service, true).await?;
            }
        }

        Ok(())
    }

    /// Current service states
    pub fn status(&self) -> &HashMap<String, ServiceState> {
        &self.service_states
    }

    /// The project network
    pub fn network(&self) -> &ProjectNetwork {
        &self.network
    }

    /// Get service start order based on dependencies
    fn start_order(&self) -> Result<Vec<String>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut visiting = HashSet::new();

        for service_name in self.config.services.keys() {
            self.topological_sort(service_name, &mut visited, &mut visiting, &mut order)?;
        }

        Ok(order)
    }

    /// Topological sort for dependency resolution
    fn topological_sort(
        &self,
        service: &str,
        visited: &mut HashSet<String>,
        visiting: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if visited.contains(service) {
            return Ok(());
        }

        if visiting.contains(service) {
            return Err(StackupError::Stack(format!(
                "Circular dependency detected for service: {}",
                service
            )));
        }

        visiting.insert(service.to_string());

        if let Some(service_config) = self.config.services.get(service) {
            if let Some(ref deps) = service_config.depends_on {
                for dep in deps {
                    self.topological_sort(dep, visited, visiting, order)?;
                }
            }
        }

        visiting.remove(service);
        visited.insert(service.to_string());
        order.push(service.to_string());

        Ok(())
    }

    /// Build the image for a service, if it declares a build section
    ///
    /// Without `rebuild`, an already-built tag is reused: build arguments
    /// changed since then have no effect until the image is rebuilt.
    async fn build_service_image(
        &self,
        service_name: &str,
        service: &ServiceConfig,
        rebuild: bool,
    ) -> Result<Option<String>> {
        let Some(build) = &service.build else {
            return Ok(None);
        };

        let tag = format!("{}-{}:latest", self.project_name, service_name);

        if !rebuild && self.images.resolve(&tag).is_some() {
            return Ok(Some(tag));
        }

        let mut context = match build {
            BuildSection::Simple(path) => BuildContext::new(self.working_dir.join(path)),
            BuildSection::Full(full) => {
                let context_dir = full
                    .context
                    .as_ref()
                    .map(|p| self.working_dir.join(p))
                    .unwrap_or_else(|| self.working_dir.clone());

                let mut context = BuildContext::new(context_dir.clone());
                if let Some(ref file) = full.dockerfile {
                    context = context.build_file(context_dir.join(file));
                }
                if let Some(ref args) = full.args {
                    for (key, value) in args {
                        context = context.arg(key, value);
                    }
                }
                context
            }
        };
        context = context.tag(&tag);

        tracing::info!("Building image for service: {}", service_name);
        ImageBuilder::new(context).build(&self.images).await?;

        Ok(Some(tag))
    }

    /// Create and start the process backing a service
    fn start_service(
        &mut self,
        service_name: &str,
        service: &ServiceConfig,
        image_tag: Option<&str>,
    ) -> Result<()> {
        let process_name = format!("{}-{}-1", self.project_name, service_name);
        let config =
            self.service_to_process_config(service_name, service, image_tag, &process_name)?;

        tracing::info!("Starting service {}", service_name);

        let id = self.processes.create(config)?;
        let endpoint = self.network.attach(service_name)?;

        match self.processes.start(&id) {
            Ok(()) => {
                self.service_states.insert(
                    service_name.to_string(),
                    ServiceState {
                        name: service_name.to_string(),
                        process_id: Some(id),
                        address: Some(endpoint.address),
                        status: ProcessStatus::Running,
                    },
                );
                Ok(())
            }
            Err(e) => {
                let _ = self.network.detach(service_name);
                self.service_states.insert(
                    service_name.to_string(),
                    ServiceState {
                        name: service_name.to_string(),
                        process_id: Some(id),
                        address: None,
                        status: ProcessStatus::Failed,
                    },
                );
                Err(e)
            }
        }
    }

    /// Stop and remove the process backing a service
    fn stop_service(&mut self, service_name: &str) {
        let Some(state) = self.service_states.get(service_name).cloned() else {
            return;
        };

        if let Some(id) = state.process_id {
            if state.status == ProcessStatus::Running {
                if let Err(e) = self.processes.stop(&id) {
                    tracing::warn!("Failed to stop service {}: {}", service_name, e);
                }
            }
            if let Err(e) = self.processes.remove(&id, true) {
                tracing::warn!("Failed to remove service {}: {}", service_name, e);
            }
        }

        let _ = self.network.detach(service_name);

        if let Some(state) = self.service_states.get_mut(service_name) {
            if state.status == ProcessStatus::Running {
                state.status = ProcessStatus::Stopped;
            }
            state.process_id = None;
            state.address = None;
        }
    }

    /// Mark a service failed without a backing process
    fn mark_failed(&mut self, service_name: &str) {
        self.service_states
            .entry(service_name.to_string())
            .and_modify(|s| s.status = ProcessStatus::Failed)
            .or_insert_with(|| ServiceState {
                name: service_name.to_string(),
                process_id: None,
                address: None,
                status: ProcessStatus::Failed,
            });
    }

    /// Convert a service definition to a process configuration
    ///
    /// Environment layering: image-baked values load first (build-time
    /// scope, immutable without rebuild), then env files, then inline
    /// `environment` entries (runtime scope).
    fn service_to_process_config(
        &self,
        service_name: &str,
        service: &ServiceConfig,
        image_tag: Option<&str>,
        process_name: &str,
    ) -> Result<ProcessConfig> {
        let image = match (&service.image, image_tag) {
            (Some(image), _) => image.clone(),
            (None, Some(tag)) => tag.to_string(),
            (None, None) => {
                return Err(StackupError::InvalidConfig(format!(
                    "Service '{}' has neither image nor build",
                    service_name
                )))
            }
        };

        let mut config = ProcessConfig::new(process_name, &image);
        config.hostname = service_name.to_string();

        if let Some(image_record) = self.images.get_by_tag(&image) {
            config.env.extend(image_record.config.env.clone());
            config.cmd = image_record.config.cmd.clone();
            config.entrypoint = image_record.config.entrypoint.clone();
            if !image_record.config.working_dir.is_empty() {
                config.working_dir = image_record.config.working_dir.clone();
            }
        }

        if let Some(ref env_files) = service.env_file {
            for path in env_files.paths() {
                let vars = env_file::load(&self.working_dir.join(path))?;
                config.env.extend(vars);
            }
        }

        if let Some(ref environment) = service.environment {
            config.env.extend(environment.to_map());
        }

        if let Some(ref command) = service.command {
            config.cmd = command.to_argv();
        }

        if let Some(ref ports) = service.ports {
            for spec in ports {
                config.ports.push(parse_port_mapping(spec)?);
            }
        }

        if let Some(ref mounts) = service.volumes {
            for spec in mounts {
                let mount = parse_mount(spec)?;
                let host_path = match &mount.source {
                    MountSource::Volume(volume) => self.volumes.ensure(volume)?.mountpoint,
                    MountSource::Bind(path) => self.working_dir.join(path),
                };
                config.mounts.push(MountPoint {
                    host_path,
                    container_path: mount.target.clone(),
                    read_only: mount.read_only,
                });
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    const THREE_TIER: &str = r#"
version: "3.8"
services:
  db:
    image: postgres:15
    environment:
      POSTGRES_DB: app
      POSTGRES_USER: app
      POSTGRES_PASSWORD: secret
    ports:
      - "5432:5432"
    volumes:
      - db-data:/var/lib/postgresql/data
  backend:
    build: ./backend
    env_file: ./backend/.env
    ports:
      - "8000:8000"
    depends_on:
      - db
  frontend:
    build:
      context: ./frontend
      args:
        NEXT_PUBLIC_API_URL: http://localhost:8000
    ports:
      - "3000:3000"
    depends_on:
      - backend
volumes:
  db-data:
"#;

    const BACKEND_BUILD_FILE: &str = r#"
FROM python:3.11-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install -r requirements.txt
COPY . .
EXPOSE 8000
CMD ["uvicorn", "main:app", "--host", "0.0.0.0", "--port", "8000"]
"#;

    const FRONTEND_BUILD_FILE: &str = r#"
FROM node:18-alpine
WORKDIR /app
ARG NEXT_PUBLIC_API_URL
ENV NEXT_PUBLIC_API_URL=${NEXT_PUBLIC_API_URL}
COPY package.json package-lock.json ./
RUN npm ci
COPY . .
EXPOSE 3000
CMD ["npm", "run", "dev"]
"#;

    struct Fixture {
        _temp: tempfile::TempDir,
        processes: Arc<ProcessManager>,
        images: Arc<ImageStore>,
        volumes: Arc<VolumeManager>,
        working_dir: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempdir().unwrap();
            let working_dir = temp.path().join("project");
            std::fs::create_dir_all(&working_dir).unwrap();

            Self {
                processes: Arc::new(
                    ProcessManager::new(temp.path().join("processes")).unwrap(),
                ),
                images: Arc::new(ImageStore::new()),
                volumes: Arc::new(VolumeManager::new(temp.path().join("volumes")).unwrap()),
                working_dir,
                _temp: temp,
            }
        }

        fn orchestrator(&self, yaml: &str) -> StackOrchestrator {
            let config = StackParser::parse_str(yaml).unwrap();
            StackOrchestrator::new(
                "demo",
                config,
                self.processes.clone(),
                self.images.clone(),
                self.volumes.clone(),
                self.working_dir.clone(),
            )
            .unwrap()
        }

        fn write_build_context(&self, dir: &str, build_file: &str) {
            let context = self.working_dir.join(dir);
            std::fs::create_dir_all(&context).unwrap();
            std::fs::write(context.join("Dockerfile"), build_file).unwrap();
        }

        fn write_three_tier_contexts(&self) {
            self.write_build_context("backend", BACKEND_BUILD_FILE);
            std::fs::write(self.working_dir.join("backend/.env"), "DATABASE_URL=postgresql://app:secret@db:5432/app\n").unwrap();
            self.write_build_context("frontend", FRONTEND_BUILD_FILE);
        }
    }

    fn write_file(path: &Path, content: &str) {
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_start_order_respects_dependencies() {
        let fixture = Fixture::new();
        let orchestrator = fixture.orchestrator(THREE_TIER);

        let order = orchestrator.start_order().unwrap();
        let db = order.iter().position(|s| s == "db").unwrap();
        let backend = order.iter().position(|s| s == "backend").unwrap();
        let frontend = order.iter().position(|s| s == "frontend").unwrap();

        assert!(db < backend);
        assert!(backend < frontend);
    }

    #[tokio::test]
    async fn test_circular_dependency_rejected_before_start() {
        let yaml = r#"
services:
  a:
    image: web:latest
    depends_on:
      - b
  b:
    image: web:latest
    depends_on:
      - a
"#;

        let fixture = Fixture::new();
        let mut orchestrator = fixture.orchestrator(yaml);

        assert!(orchestrator.up(false).await.is_err());
        assert_eq!(fixture.processes.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_host_port_rejected_before_start() {
        let yaml = r#"
services:
  backend:
    image: api:latest
    ports:
      - "8000:8000"
  frontend:
    image: web:latest
    ports:
      - "8000:3000"
"#;

        let fixture = Fixture::new();
        let mut orchestrator = fixture.orchestrator(yaml);

        assert!(orchestrator.up(false).await.is_err());
        assert_eq!(fixture.processes.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_up_three_tier_stack() {
        let fixture = Fixture::new();
        fixture.write_three_tier_contexts();

        let mut orchestrator = fixture.orchestrator(THREE_TIER);
        orchestrator.up(false).await.unwrap();

        assert_eq!(fixture.processes.running_count().unwrap(), 3);
        for state in orchestrator.status().values() {
            assert_eq!(state.status, ProcessStatus::Running);
        }

        // Host port 3000 reaches the frontend listener
        let owner = fixture.processes.lookup_host_port(3000).unwrap().unwrap();
        assert_eq!(owner.hostname, "frontend");
        assert_eq!(owner.ports[0].container_port, 3000);

        // Service-name addressing on the project network
        assert!(orchestrator.network().resolve("backend").is_some());
        assert_eq!(
            orchestrator.network().endpoint_url("backend", 8000).as_deref(),
            Some("http://backend:8000")
        );

        // The public API URL is baked into the frontend image
        let frontend = fixture.processes.find_by_name("demo-frontend-1").unwrap().unwrap();
        assert_eq!(
            frontend.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://localhost:8000")
        );

        // Runtime credentials come from the descriptor
        let db = fixture.processes.find_by_name("demo-db-1").unwrap().unwrap();
        assert_eq!(db.env.get("POSTGRES_DB").map(String::as_str), Some("app"));

        // The env file reaches the backend process
        let backend = fixture.processes.find_by_name("demo-backend-1").unwrap().unwrap();
        assert!(backend.env.contains_key("DATABASE_URL"));
    }

    #[tokio::test]
    async fn test_down_stops_in_reverse_and_releases_ports() {
        let fixture = Fixture::new();
        fixture.write_three_tier_contexts();

        let mut orchestrator = fixture.orchestrator(THREE_TIER);
        orchestrator.up(false).await.unwrap();
        orchestrator.down(false).await.unwrap();

        assert_eq!(fixture.processes.running_count().unwrap(), 0);
        assert_eq!(fixture.processes.count().unwrap(), 0);
        assert!(fixture.processes.lookup_host_port(3000).unwrap().is_none());
        for state in orchestrator.status().values() {
            assert_eq!(state.status, ProcessStatus::Stopped);
        }
    }

    #[tokio::test]
    async fn test_volume_persists_across_down_up() {
        let fixture = Fixture::new();
        fixture.write_three_tier_contexts();

        let mut orchestrator = fixture.orchestrator(THREE_TIER);
        orchestrator.up(false).await.unwrap();

        let volume = fixture.volumes.get("db-data").unwrap();
        write_file(&volume.mountpoint.join("pg_data"), "rows");

        orchestrator.down(false).await.unwrap();
        orchestrator.up(false).await.unwrap();

        let volume = fixture.volumes.get("db-data").unwrap();
        assert!(volume.mountpoint.join("pg_data").exists());
    }

    #[tokio::test]
    async fn test_volume_removal_yields_empty_store() {
        let fixture = Fixture::new();
        fixture.write_three_tier_contexts();

        let mut orchestrator = fixture.orchestrator(THREE_TIER);
        orchestrator.up(false).await.unwrap();

        let volume = fixture.volumes.get("db-data").unwrap();
        write_file(&volume.mountpoint.join("pg_data"), "rows");

        orchestrator.down(true).await.unwrap();
        orchestrator.up(false).await.unwrap();

        let volume = fixture.volumes.get("db-data").unwrap();
        let entries: Vec<_> = std::fs::read_dir(&volume.mountpoint).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_build_failure_prunes_dependents_only() {
        let fixture = Fixture::new();
        // The backend build context is missing; db is independent
        fixture.write_build_context("frontend", FRONTEND_BUILD_FILE);

        let mut orchestrator = fixture.orchestrator(THREE_TIER);
        orchestrator.up(false).await.unwrap();

        let states = orchestrator.status();
        assert_eq!(states["db"].status, ProcessStatus::Running);
        assert_eq!(states["backend"].status, ProcessStatus::Failed);
        assert_eq!(states["frontend"].status, ProcessStatus::Failed);

        // The frontend never got a process
        assert!(fixture
            .processes
            .find_by_name("demo-frontend-1")
            .unwrap()
            .is_none());
        assert_eq!(fixture.processes.running_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_does_not_prune_dependents() {
        let yaml = r#"
services:
  backend:
    image: api:latest
    ports:
      - "8000:8000"
  frontend:
    image: web:latest
    ports:
      - "3000:3000"
    depends_on:
      - backend
"#;

        let fixture = Fixture::new();

        // Another process already owns host port 8000
        let squatter = fixture
            .processes
            .create(ProcessConfig::new("squatter", "api:latest").port(8000, 80))
            .unwrap();
        fixture.processes.start(&squatter).unwrap();

        let mut orchestrator = fixture.orchestrator(yaml);
        orchestrator.up(false).await.unwrap();

        let states = orchestrator.status();
        assert_eq!(states["backend"].status, ProcessStatus::Failed);
        // The dependent still attempted to start, and succeeded
        assert_eq!(states["frontend"].status, ProcessStatus::Running);
    }

    #[tokio::test]
    async fn test_environment_precedence() {
        let yaml = r#"
services:
  backend:
    image: api:latest
    env_file: backend.env
    environment:
      NODE_ENV: production
"#;

        let fixture = Fixture::new();
        write_file(
            &fixture.working_dir.join("backend.env"),
            "NODE_ENV=development\nDATABASE_URL=postgresql://app:secret@db:5432/app\n",
        );

        let mut orchestrator = fixture.orchestrator(yaml);
        orchestrator.up(false).await.unwrap();

        let backend = fixture.processes.find_by_name("demo-backend-1").unwrap().unwrap();
        // Inline environment overrides the env file
        assert_eq!(backend.env.get("NODE_ENV").map(String::as_str), Some("production"));
        assert!(backend.env.contains_key("DATABASE_URL"));
    }

    #[tokio::test]
    async fn test_missing_env_file_fails_service_start() {
        let yaml = r#"
services:
  backend:
    image: api:latest
    env_file: missing.env
"#;

        let fixture = Fixture::new();
        let mut orchestrator = fixture.orchestrator(yaml);
        orchestrator.up(false).await.unwrap();

        assert_eq!(
            orchestrator.status()["backend"].status,
            ProcessStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_changed_build_arg_requires_rebuild() {
        let fixture = Fixture::new();
        fixture.write_three_tier_contexts();

        let mut orchestrator = fixture.orchestrator(THREE_TIER);
        orchestrator.up(false).await.unwrap();
        orchestrator.down(false).await.unwrap();

        // The descriptor now carries a different public API URL
        let changed = THREE_TIER.replace("http://localhost:8000", "http://api.example.com");
        let mut orchestrator = fixture.orchestrator(&changed);

        // Without a rebuild the old value stays baked in
        orchestrator.up(false).await.unwrap();
        let frontend = fixture.processes.find_by_name("demo-frontend-1").unwrap().unwrap();
        assert_eq!(
            frontend.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://localhost:8000")
        );

        orchestrator.down(false).await.unwrap();

        // Rebuilding bakes the new value
        orchestrator.up(true).await.unwrap();
        let frontend = fixture.processes.find_by_name("demo-frontend-1").unwrap().unwrap();
        assert_eq!(
            frontend.env.get("NEXT_PUBLIC_API_URL").map(String::as_str),
            Some("http://api.example.com")
        );
    }
}
