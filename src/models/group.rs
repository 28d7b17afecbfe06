/// Server groups (replica sets) and their members

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::GroupId;
use crate::error::MigrateError;

/// Replication role of a server inside its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerRole {
    Master,
    Slave,
    Offline,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Master => write!(f, "master"),
            ServerRole::Slave => write!(f, "slave"),
            ServerRole::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for ServerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "master" => Ok(ServerRole::Master),
            "slave" | "replica" => Ok(ServerRole::Slave),
            "offline" => Ok(ServerRole::Offline),
            _ => Err(format!("Unknown server role: {}", s)),
        }
    }
}

/// A backend data node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub addr: String,
    pub role: ServerRole,
    pub group_id: GroupId,
}

impl Server {
    pub fn new(addr: &str, role: ServerRole, group_id: GroupId) -> Self {
        Self {
            addr: addr.to_string(),
            role,
            group_id,
        }
    }
}

/// A named replica set; at most one member is master at a time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroup {
    pub id: GroupId,
    pub product: String,
    #[serde(default)]
    pub servers: Vec<Server>,
}

impl ServerGroup {
    pub fn new(product: &str, id: GroupId) -> Self {
        Self {
            id,
            product: product.to_string(),
            servers: Vec::new(),
        }
    }

    /// The current master, if one has been elected
    pub fn master(&self) -> Option<&Server> {
        self.servers.iter().find(|s| s.role == ServerRole::Master)
    }

    pub fn server_exists(&self, addr: &str) -> bool {
        self.servers.iter().any(|s| s.addr == addr)
    }

    /// Add a member, returning false if it is already present
    pub fn add_server(&mut self, addr: &str, role: ServerRole) -> bool {
        if self.server_exists(addr) {
            return false;
        }
        if role == ServerRole::Master {
            // a new master demotes the old one
            for server in self.servers.iter_mut().filter(|s| s.role == ServerRole::Master) {
                server.role = ServerRole::Slave;
            }
        }
        self.servers.push(Server::new(addr, role, self.id));
        true
    }

    /// Remove a member, returning it if it was present
    pub fn remove_server(&mut self, addr: &str) -> Option<Server> {
        let pos = self.servers.iter().position(|s| s.addr == addr)?;
        Some(self.servers.remove(pos))
    }
}

/// A `host:port` pair as passed to the migration verbs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl FromStr for NodeAddr {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| MigrateError::invalid_addr(s))?;
        if host.is_empty() || host.contains(':') {
            return Err(MigrateError::invalid_addr(s));
        }
        let port = port.parse().map_err(|_| MigrateError::invalid_addr(s))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
