//! Build-script generation for job environments.

use crate::blueprint::Blueprint;
use std::path::Path;

/// File name of the generated build script inside the job directory.
pub const BUILD_SCRIPT_NAME: &str = "Dockerfile";

/// Inputs for rendering a job's build script.
pub struct BuildScriptRequest<'a> {
    pub blueprint: &'a dyn Blueprint,
    pub base_image: &'a str,
    /// Build context, i.e. the job directory
    pub context_dir: &'a Path,
    pub resources_path: &'a Path,
}

/// Renders the build descriptor for a blueprint.
pub trait BuildScriptGenerator: Send + Sync {
    fn generate(&self, request: &BuildScriptRequest<'_>) -> anyhow::Result<String>;
}

/// Plain Dockerfile renderer: base image, then every builder in order.
#[derive(Debug, Clone, Default)]
pub struct DockerfileGenerator;

impl BuildScriptGenerator for DockerfileGenerator {
    fn generate(&self, request: &BuildScriptRequest<'_>) -> anyhow::Result<String> {
        if request.base_image.trim().is_empty() {
            anyhow::bail!("no base image configured");
        }

        let resources = request
            .resources_path
            .strip_prefix(request.context_dir)
            .unwrap_or(request.resources_path);

        let mut script = format!("FROM {}\n", request.base_image);
        script.push_str("ENV MOULINETTE_RESOURCES=/moulinette/resources\n");
        for builder in request.blueprint.builders() {
            script.push_str(&format!("\n# {}\n", builder.name()));
            for line in builder.instructions(resources) {
                script.push_str(&line);
                script.push('\n');
            }
        }
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{InstructionBuilder, StaticBlueprint};

    #[test]
    fn renders_builders_in_order_with_relative_resources() {
        let blueprint = StaticBlueprint::new()
            .with_builder(InstructionBuilder::new("system", vec!["RUN apt-get update".into()]))
            .with_builder(InstructionBuilder::new(
                "deps",
                vec!["COPY {resources}/req.txt /tmp/req.txt".into()],
            ));

        let script = DockerfileGenerator
            .generate(&BuildScriptRequest {
                blueprint: &blueprint,
                base_image: "python:3.11-slim",
                context_dir: Path::new("/jobs/tp-1"),
                resources_path: Path::new("/jobs/tp-1/resources"),
            })
            .unwrap();

        assert!(script.starts_with("FROM python:3.11-slim\n"));
        let system = script.find("RUN apt-get update").unwrap();
        let deps = script.find("COPY resources/req.txt /tmp/req.txt").unwrap();
        assert!(system < deps);
    }

    #[test]
    fn empty_base_image_is_rejected() {
        let blueprint = StaticBlueprint::new();
        let result = DockerfileGenerator.generate(&BuildScriptRequest {
            blueprint: &blueprint,
            base_image: " ",
            context_dir: Path::new("/jobs/x"),
            resources_path: Path::new("/jobs/x/resources"),
        });
        assert!(result.is_err());
    }
}
