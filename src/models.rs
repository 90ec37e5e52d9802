//! Response bodies, shaped after the Refget v2.0.0 schema.

use serde::Serialize;

use crate::config::SERVICEVERSION;

#[derive(Debug, Serialize)]
pub struct RefgetServiceInfo {
    pub refget: Refget,
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub organization: Organization,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Refget {
    pub circular_supported: bool,
    pub algorithms: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceType {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct Organization {
    pub name: String,
    pub url: String,
}

impl RefgetServiceInfo {
    /// The static description this deployment reports.
    pub fn current() -> Self {
        RefgetServiceInfo {
            refget: Refget {
                circular_supported: true,
                algorithms: vec![
                    "md5".to_string(),
                    "ga4gh".to_string(),
                    "trunc512".to_string(),
                ],
            },
            id: "refget.server".to_string(),
            name: "Refget server".to_string(),
            service_type: ServiceType {
                group: "org.ga4gh".to_string(),
                artifact: "refget".to_string(),
                version: "2.0.0".to_string(),
            },
            organization: Organization {
                name: "Refget server".to_string(),
                url: "https://example.org".to_string(),
            },
            version: SERVICEVERSION.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Metadata {
    pub metadata: SequenceMetadata,
}

#[derive(Debug, Serialize)]
pub struct SequenceMetadata {
    pub id: String,
    pub md5: String,
    pub trunc512: String,
    pub ga4gh: String,
    pub length: u64,
    pub aliases: Vec<Alias>,
}

#[derive(Debug, Serialize)]
pub struct Alias {
    pub naming_authority: String,
    pub alias: String,
}
