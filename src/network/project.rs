//! Project network and service addressing

use crate::error::{Result, StackupError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use uuid::Uuid;

/// Default project subnet
pub const DEFAULT_SUBNET: &str = "172.28.0.0/16";

/// Service endpoint on the project network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Service name (also the hostname on the network)
    pub service: String,
    /// Endpoint ID
    pub endpoint_id: String,
    /// Allocated address
    pub address: Ipv4Addr,
}

/// Per-project bridge network
///
/// Services are attached under their service name; other services reach
/// them as `scheme://service-name:container-port`.
pub struct ProjectNetwork {
    /// Network name
    pub name: String,
    /// Subnet in CIDR form
    subnet: String,
    /// Address allocator
    allocator: AddressAllocator,
    /// Attached endpoints by service name
    endpoints: HashMap<String, Endpoint>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl ProjectNetwork {
    /// Create the network for a project
    pub fn new(project_name: &str) -> Result<Self> {
        Self::with_subnet(project_name, DEFAULT_SUBNET)
    }

    /// Create the network with an explicit subnet
    pub fn with_subnet(project_name: &str, subnet: &str) -> Result<Self> {
        let allocator = AddressAllocator::new(subnet)?;

        Ok(Self {
            name: format!("{}_default", project_name),
            subnet: subnet.to_string(),
            allocator,
            endpoints: HashMap::new(),
            created_at: Utc::now(),
        })
    }

    /// Get the subnet
    pub fn subnet(&self) -> &str {
        &self.subnet
    }

    /// Attach a service to the network
    pub fn attach(&mut self, service: &str) -> Result<Endpoint> {
        if self.endpoints.contains_key(service) {
            return Err(StackupError::Network(format!(
                "Service {} is already attached to network {}",
                service, self.name
            )));
        }

        let endpoint = Endpoint {
            service: service.to_string(),
            endpoint_id: Uuid::new_v4().to_string().replace("-", "")[..12].to_string(),
            address: self.allocator.allocate()?,
        };

        self.endpoints.insert(service.to_string(), endpoint.clone());

        Ok(endpoint)
    }

    /// Detach a service from the network
    pub fn detach(&mut self, service: &str) -> Result<()> {
        let endpoint = self.endpoints.remove(service).ok_or_else(|| {
            StackupError::Network(format!(
                "Service {} is not attached to network {}",
                service, self.name
            ))
        })?;

        self.allocator.release(endpoint.address);

        Ok(())
    }

    /// Resolve a service name to its address
    pub fn resolve(&self, service: &str) -> Option<Ipv4Addr> {
        self.endpoints.get(service).map(|e| e.address)
    }

    /// Internal URL for a service port
    pub fn endpoint_url(&self, service: &str, port: u16) -> Option<String> {
        self.endpoints
            .get(service)
            .map(|e| format!("http://{}:{}", e.service, port))
    }

    /// Attached endpoints
    pub fn endpoints(&self) -> &HashMap<String, Endpoint> {
        &self.endpoints
    }
}

/// Address allocator for a subnet
pub struct AddressAllocator {
    /// Subnet base address
    base: Ipv4Addr,
    /// Allocated addresses
    allocated: Vec<Ipv4Addr>,
}

impl AddressAllocator {
    /// Create a new allocator for a subnet
    pub fn new(subnet: &str) -> Result<Self> {
        let parts: Vec<&str> = subnet.split('/').collect();
        if parts.len() != 2 {
            return Err(StackupError::Network(format!("Invalid subnet: {}", subnet)));
        }

        let base: Ipv4Addr = parts[0]
            .parse()
            .map_err(|_| StackupError::Network(format!("Invalid IP: {}", parts[0])))?;

        // Gateway is .1, allocation starts at .2
        let octets = base.octets();

        Ok(Self {
            base,
            allocated: vec![Ipv4Addr::new(octets[0], octets[1], octets[2], 1)],
        })
    }

    /// Allocate the lowest free address
    pub fn allocate(&mut self) -> Result<Ipv4Addr> {
        let octets = self.base.octets();
        let start = u32::from(Ipv4Addr::new(octets[0], octets[1], octets[2], 2));

        for raw in start..start + 65534 {
            let candidate = Ipv4Addr::from(raw);
            if !self.allocated.contains(&candidate) {
                self.allocated.push(candidate);
                return Ok(candidate);
            }
        }

        Err(StackupError::Network(format!(
            "No free addresses in subnet {}",
            self.base
        )))
    }

    /// Release an address
    pub fn release(&mut self, address: Ipv4Addr) {
        self.allocated.retain(|&a| a != address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_sequential() {
        let mut allocator = AddressAllocator::new("172.28.0.0/16").unwrap();

        assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(172, 28, 0, 2));
        assert_eq!(allocator.allocate().unwrap(), Ipv4Addr::new(172, 28, 0, 3));
    }

    #[test]
    fn test_service_name_addressing() {
        let mut network = ProjectNetwork::new("demo").unwrap();

        network.attach("db").unwrap();
        network.attach("backend").unwrap();

        assert_eq!(network.resolve("db"), Some(Ipv4Addr::new(172, 28, 0, 2)));
        assert_eq!(
            network.endpoint_url("backend", 8000).as_deref(),
            Some("http://backend:8000")
        );
        assert!(network.resolve("frontend").is_none());
    }

    #[test]
    fn test_duplicate_attach_rejected() {
        let mut network = ProjectNetwork::new("demo").unwrap();

        network.attach("db").unwrap();
        assert!(network.attach("db").is_err());
    }

    #[test]
    fn test_detach_releases_address() {
        let mut network = ProjectNetwork::new("demo").unwrap();

        let endpoint = network.attach("db").unwrap();
        network.detach("db").unwrap();

        // The released address is allocatable again
        let again = network.attach("db").unwrap();
        assert_eq!(endpoint.address, again.address);
    }
}
