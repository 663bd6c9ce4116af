//! Command-line surface shared by the three daemon binaries (§6 "Process interface").
//!
//! Every `mink-*d` binary takes the same flag set, so it lives once here instead of being
//! duplicated per binary. `clap`'s derive API replaces the teacher's lack of any argument
//! parser (`t51server::main` took none) the way the rest of this corpus does CLI daemons.
use clap::Parser;

#[derive(Debug, Parser)]
#[command(disable_help_subcommand = true)]
pub struct DaemonArgs {
    /// This daemon's id, at most 15 characters (§6, §3 GLOSSARY "daemon id").
    #[arg(short = 'i', long = "id")]
    pub id: String,

    /// Listen port.
    #[arg(short = 'p', long = "port")]
    pub port: u16,

    /// Optional schema file describing the message tree this daemon speaks.
    #[arg(short = 'd', long = "schema")]
    pub schema_file: Option<String>,

    /// Optional initial contents file (e.g. a config daemon's seed tree).
    #[arg(short = 'c', long = "contents")]
    pub contents_file: Option<String>,

    /// Routing peer address, repeatable.
    #[arg(short = 'r', long = "route", value_name = "IP:PORT")]
    pub routes: Vec<String>,

    /// Peer daemon id to expect at the matching `-r` address, repeatable.
    #[arg(short = 'n', long = "peer-id")]
    pub peer_ids: Vec<String>,

    /// Enable debug-level logging.
    #[arg(short = 'D', long = "debug")]
    pub debug: bool,

    /// Register as a router (participates in weighted round-robin routing).
    #[arg(short = 'R', long = "router")]
    pub router: bool,

    /// Stream table capacity per client.
    #[arg(long = "gdt-streams", default_value_t = 1024)]
    pub gdt_streams: usize,

    /// Stream timeout in seconds.
    #[arg(long = "gdt-stimeout", default_value_t = 30)]
    pub gdt_stimeout: u64,
}

impl DaemonArgs {
    /// `-i`'s length bound from §6.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.len() > 15 {
            return Err(format!("daemon id {:?} exceeds the 15 character limit", self.id));
        }
        if self.routes.len() != self.peer_ids.len() {
            return Err("every -r routing peer needs a matching -n peer id".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_long_id() {
        let args = DaemonArgs {
            id: "this-id-is-way-too-long".to_string(),
            port: 9000,
            schema_file: None,
            contents_file: None,
            routes: vec![],
            peer_ids: vec![],
            debug: false,
            router: false,
            gdt_streams: 1024,
            gdt_stimeout: 30,
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_routes() {
        let args = DaemonArgs {
            id: "short".to_string(),
            port: 9000,
            schema_file: None,
            contents_file: None,
            routes: vec!["127.0.0.1:9001".to_string()],
            peer_ids: vec![],
            debug: false,
            router: false,
            gdt_streams: 1024,
            gdt_stimeout: 30,
        };
        assert!(args.validate().is_err());
    }
}
