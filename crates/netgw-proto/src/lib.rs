//! Generated gRPC surface for the device gateway.
//!
//! Two services are compiled from `proto/` at build time:
//!
//! - `gateway.v1.Gateway`: the command execution service.
//! - `gnmi.gNMI`: the standard telemetry service, wire-compatible with
//!   `github.com/openconfig/gnmi` so requests and responses can be
//!   relayed to backend devices verbatim.

/// gNMI extension messages (`gnmi_ext` package).
pub mod gnmi_ext {
    #![allow(missing_docs)]
    tonic::include_proto!("gnmi_ext");
}

/// gNMI service and messages (`gnmi` package).
pub mod gnmi {
    #![allow(missing_docs)]
    #![allow(clippy::large_enum_variant)]
    tonic::include_proto!("gnmi");
}

/// Command service (`gateway.v1` package).
pub mod gateway {
    pub mod v1 {
        #![allow(missing_docs)]
        tonic::include_proto!("gateway.v1");
    }
}

pub use gateway::v1::{
    gateway_client::GatewayClient,
    gateway_server::{Gateway, GatewayServer},
    CommandRequest, CommandResponse,
};
pub use gnmi::{
    g_nmi_client::GNmiClient,
    g_nmi_server::{GNmi, GNmiServer},
};
