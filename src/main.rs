// # RustyLockd demo harness
//
// Standalone binary that wires `LockServerCache` to a single-node stand-in
// for the RSM and RPC transport this crate does not implement, then drives
// it from an interactive REPL. This is not a second implementation of the
// protocol — it exists so the core can be exercised without a real
// consensus layer, the way the teacher's own CLI drives its server over a
// real socket.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use rusty_lockd::{ClientDirectory, ClientId, LockServerCache, PrimaryOracle, ReplyCode, ServerConfig, VERSION};

/// Always-primary oracle: a standalone replica has no one to lose an
/// election to.
struct SingleNodePrimary;

impl PrimaryOracle for SingleNodePrimary {
    fn is_primary(&self) -> bool {
        true
    }
}

/// Logs outbound revoke/retry instead of delivering them over a real RPC
/// transport, which is out of scope for this crate.
struct LoggingClientDirectory;

impl ClientDirectory for LoggingClientDirectory {
    fn revoke(&self, client: &ClientId, lid: u64, xid: u64) {
        tracing::info!(client = %client, lid, xid, "[demo transport] would send revoke");
    }

    fn retry(&self, client: &ClientId, lid: u64, xid: u64) {
        tracing::info!(client = %client, lid, xid, "[demo transport] would send retry");
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    print_banner();

    let config_path = std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("lockd.json");
    let config = ServerConfig::from_file(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ServerConfig::default()
    });

    tracing::info!(node_id = %config.node_id, "rusty-lockd starting");

    let server = LockServerCache::with_config(
        &config,
        Arc::new(SingleNodePrimary),
        Arc::new(LoggingClientDirectory),
    );

    println!("Type commands, or 'help'. Ctrl-D to exit.");
    repl(&server);
}

fn repl(server: &LockServerCache) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        let parts: Vec<&str> = line.trim().split_whitespace().collect();

        match parts.as_slice() {
            [] => {}
            ["help"] => print_help(),
            ["acquire", lid, id, xid] => match (lid.parse::<u64>(), xid.parse::<u64>()) {
                (Ok(lid), Ok(xid)) => {
                    let reply = server.acquire(lid, ClientId::new(*id), xid);
                    print_reply(reply);
                }
                _ => println!("usage: acquire <lid> <client> <xid>"),
            },
            ["release", lid, id, xid] => match (lid.parse::<u64>(), xid.parse::<u64>()) {
                (Ok(lid), Ok(xid)) => {
                    let reply = server.release(lid, ClientId::new(*id), xid);
                    print_reply(reply);
                }
                _ => println!("usage: release <lid> <client> <xid>"),
            },
            ["stat", lid] => match lid.parse::<u64>() {
                Ok(lid) => {
                    let (reply, count) = server.stat(lid);
                    println!("{} grants={}", reply, count);
                }
                _ => println!("usage: stat <lid>"),
            },
            ["snapshot"] => {
                let bytes = server.marshal_state();
                println!("marshal_state: {} bytes", bytes.len());
            }
            ["exit"] | ["quit"] => break,
            _ => println!("unrecognized command, try 'help'"),
        }

        print!("> ");
        let _ = io::stdout().flush();
    }
}

fn print_reply(reply: ReplyCode) {
    println!("{} ({})", reply, reply.as_i32());
}

fn print_help() {
    println!("commands:");
    println!("  acquire <lid> <client> <xid>");
    println!("  release <lid> <client> <xid>");
    println!("  stat <lid>");
    println!("  snapshot");
    println!("  exit");
}

fn print_banner() {
    println!("==============================================");
    println!(" rusty-lockd v{}", VERSION);
    println!(" replicated caching lock server core (demo harness)");
    println!("==============================================");
}
