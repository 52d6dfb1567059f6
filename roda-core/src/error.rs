use thiserror::Error;

/// Non-recoverable data-consistency violations.
///
/// These always abort the stage that detected them and are worth an
/// operator notification: the fix lives in the upstream catalog (Airtable
/// or the known-unassigned list), never in a retry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    /// The same GPS device is claimed by more than one contact.
    #[error("GPS device {gps_id} is associated with more than one contact")]
    DuplicateGpsDevice {
        /// The device identifier that appears twice
        gps_id: String,
    },

    /// Devices present in the day's routes that neither resolve to a
    /// contact address nor appear in the known-unassigned list.
    #[error("devices without an associated contact: {}", devices.join(", "))]
    UnresolvedDevices {
        /// The unresolved device identifiers
        devices: Vec<String>,
    },

    /// A contact that refers itself.
    #[error("client {client_id} is its own referrer")]
    SelfReferral {
        /// The offending client id
        client_id: u64,
    },

    /// A route id that was issued twice within one partition.
    #[error("route id {route_id} issued more than once")]
    DuplicateRouteId {
        /// The duplicated route id
        route_id: u64,
    },
}
