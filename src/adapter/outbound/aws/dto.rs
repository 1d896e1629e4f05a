//! JSON shapes returned by the EC2 command line.

use serde::Deserialize;

use crate::port::{InstanceState, InstanceStatus};

/// Output of `ec2 run-instances`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RunInstancesResponse {
    #[serde(default)]
    pub instances: Vec<Ec2Instance>,
}

/// Output of `ec2 describe-instances`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeInstancesResponse {
    #[serde(default)]
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Reservation {
    #[serde(default)]
    pub instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2Instance {
    pub instance_id: String,
    #[serde(default)]
    pub state: Option<Ec2State>,
    #[serde(default)]
    pub public_ip_address: Option<String>,
    #[serde(default)]
    pub private_ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2State {
    pub name: String,
}

impl Ec2Instance {
    #[must_use]
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            state: self
                .state
                .as_ref()
                .map_or(InstanceState::Unknown, |s| InstanceState::from_name(&s.name)),
            public_address: self.public_ip_address.clone(),
            private_address: self.private_ip_address.clone(),
        }
    }
}
