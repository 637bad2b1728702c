//! Node and topology configuration.
//!
//! A topology file lists nodes and the links between them:
//!
//! ```yaml
//! nodes:
//!   - name: vm1
//!     type: nop
//!   - name: br0
//!     type: switch
//!     west: 8
//!     east: 8
//!   - name: vx0
//!     type: vtep
//!     options:
//!       ip: 10.0.0.1
//!       mac: "52:54:00:12:34:56"
//!       tunnel: east
//! links:
//!   - { west: vm1, east: br0 }
//!   - { west: br0, east: vx0 }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, Result};

/// Configuration handed to a brick type's init callback.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrickConfig {
    pub name: String,

    /// Edge slots on the west side. Defaults to the capacity class default.
    #[serde(default)]
    pub west: Option<u32>,

    /// Edge slots on the east side.
    #[serde(default)]
    pub east: Option<u32>,

    /// Type specific options, decoded by the brick.
    #[serde(default)]
    pub options: serde_yaml::Value,
}

impl BrickConfig {
    pub fn new(name: &str) -> BrickConfig {
        BrickConfig {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_sides(name: &str, west: u32, east: u32) -> BrickConfig {
        BrickConfig {
            name: name.to_string(),
            west: Some(west),
            east: Some(east),
            ..Default::default()
        }
    }

    /// Attach typed options.
    pub fn with_options<T: Serialize>(mut self, options: &T) -> Result<BrickConfig> {
        self.options = serde_yaml::to_value(options).map_err(ConfigurationError::Options)?;
        Ok(self)
    }

    /// Decode the options into `T`. Missing options decode as `T::default()`.
    pub fn options<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.options.is_null() {
            return Ok(T::default());
        }
        let options =
            serde_yaml::from_value(self.options.clone()).map_err(ConfigurationError::Options)?;
        Ok(options)
    }

    /// Decode the options into `T`, failing when there are none.
    pub fn required_options<T: DeserializeOwned>(&self) -> Result<T> {
        if self.options.is_null() {
            return Err(ConfigurationError::MissingOptions(self.name.clone()).into());
        }
        let options =
            serde_yaml::from_value(self.options.clone()).map_err(ConfigurationError::Options)?;
        Ok(options)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(flatten)]
    pub brick: BrickConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub west: String,
    pub east: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub links: Vec<LinkConfig>,
}

impl TopologyConfig {
    pub fn from_yaml(text: &str) -> Result<TopologyConfig> {
        let config = serde_yaml::from_str(text).map_err(ConfigurationError::Options)?;
        Ok(config)
    }
}
