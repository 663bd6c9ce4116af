//! SCTP transport constants (`spec.md` §6).
//!
//! No portable SCTP socket API exists in the Rust ecosystem that this workspace can depend on
//! without vendoring a kernel-specific binding, so this module stays documentation-only: it
//! records the association tuning an eventual `SctpTransport` must use, without implementing
//! the socket itself. `TcpFramedTransport` (`transport::framed`) is the `Transport` actually
//! wired into the daemons.

use std::time::Duration;

/// Heartbeat interval for the SCTP association itself (distinct from the GDT application-level
/// heartbeat in `crate::heartbeat`).
pub const SCTP_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum path retransmissions before an association is considered unreachable.
pub const SCTP_PATH_MAX_RETRANS: u32 = 5;

pub const SCTP_RTO_MIN: Duration = Duration::from_millis(1000);
pub const SCTP_RTO_MAX: Duration = Duration::from_secs(60);
pub const SCTP_RTO_INITIAL: Duration = Duration::from_secs(3);

/// Number of outbound/inbound streams negotiated at association setup. GDT multiplexes its
/// own logical streams (`crate::stream`) over a single SCTP stream, so one is sufficient.
pub const SCTP_STREAM_COUNT: u16 = 1;
