//! Finding a service's containers on the host
//!
//! Containers are matched by their compose labels and ordered by creation
//! time as reported by `docker inspect`, never by listing order.

use chrono::{DateTime, FixedOffset};

use crate::remote::{RemoteCommand, RemoteSession, RemoteSessionExt};
use crate::swap::SwapError;
use crate::utils::shell_quote;

/// A running container of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub created: DateTime<FixedOffset>,
}

impl ContainerInfo {
    /// First 12 characters of the id, as docker prints it
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

pub fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Lists running containers of `service` in `project` as `<id> <created>`
pub fn list_command(project: &str, service: &str) -> RemoteCommand {
    RemoteCommand::new(format!(
        "docker ps -q {} | xargs -r docker inspect --format '{{{{.Id}}}} {{{{.Created}}}}'",
        label_filters(project, service)
    ))
}

/// `--filter` arguments matching the containers of one compose service
pub fn label_filters(project: &str, service: &str) -> String {
    format!(
        "--filter {} --filter {}",
        shell_quote(&format!("label=com.docker.compose.project={project}")),
        shell_quote(&format!("label=com.docker.compose.service={service}"))
    )
}

/// Prints the private addresses of a container, space separated
pub fn address_command(id: &str) -> RemoteCommand {
    RemoteCommand::new(format!(
        "docker inspect -f '{{{{range .NetworkSettings.Networks}}}}{{{{.IPAddress}}}} {{{{end}}}}' {}",
        shell_quote(id)
    ))
}

/// Parse `list_command` output, oldest container first
pub fn parse_listing<'a, I>(lines: I) -> Result<Vec<ContainerInfo>, SwapError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut containers = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (id, created) = line
            .split_once(char::is_whitespace)
            .ok_or_else(|| SwapError::Listing(line.to_string()))?;
        let created = DateTime::parse_from_rfc3339(created.trim())
            .map_err(|e| SwapError::Listing(format!("{line}: {e}")))?;
        containers.push(ContainerInfo {
            id: id.to_string(),
            created,
        });
    }
    containers.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
    Ok(containers)
}

/// Running containers of a service, oldest first
pub async fn list_containers(
    session: &dyn RemoteSession,
    project: &str,
    service: &str,
) -> Result<Vec<ContainerInfo>, SwapError> {
    let output = session.run(list_command(project, service)).await?;
    parse_listing(output.stdout_lines())
}

/// First private address of a container
pub async fn resolve_address(session: &dyn RemoteSession, id: &str) -> Result<String, SwapError> {
    let output = session.run(address_command(id)).await?;
    let address = output
        .stdout_lines()
        .flat_map(str::split_whitespace)
        .find(|ip| !ip.is_empty())
        .map(str::to_string);
    address.ok_or_else(|| SwapError::NoAddress { id: id.to_string() })
}
