//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Find and stop processes holding GDS bus ports."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Socket ownership comes from procfs: `/proc/net/tcp{,6}` maps local ports
//! to socket inodes and `/proc/<pid>/fd/*` links back to `socket:[inode]`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use iris_gds_ipc::Port;
use tracing::{info, warn};

const PROC_ROOT: &str = "/proc";

/// Dispatch entry point for port subcommands.
pub fn run(command: PortsCommand) -> Result<()> {
    match command {
        PortsCommand::List => {
            let holders = scan(Path::new(PROC_ROOT))?;
            print!("{}", render(&holders));
            Ok(())
        }
        PortsCommand::Kill(cmd) => cmd.execute(),
    }
}

#[derive(Debug, Subcommand)]
pub enum PortsCommand {
    /// List processes holding GDS ports.
    List,
    /// Send SIGTERM to processes holding GDS ports.
    Kill(KillCommand),
}

#[derive(Debug, Args)]
pub struct KillCommand {
    /// Skip the confirmation prompt.
    #[arg(long, short = 'y')]
    yes: bool,
}

impl KillCommand {
    fn execute(self) -> Result<()> {
        let holders = scan(Path::new(PROC_ROOT))?;
        if holders.is_empty() {
            println!("no processes hold GDS ports");
            return Ok(());
        }
        print!("{}", render(&holders));
        if !self.yes && !confirm("terminate these processes? [y/N] ")? {
            println!("aborted");
            return Ok(());
        }

        let mut failed = 0usize;
        for holder in &holders {
            match terminate(holder.pid) {
                Ok(()) => info!(pid = holder.pid, name = %holder.name, "sent SIGTERM"),
                Err(err) => {
                    warn!(pid = holder.pid, name = %holder.name, error = %err, "could not signal process");
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            bail!("{failed} of {} processes could not be signalled", holders.len());
        }
        Ok(())
    }
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[cfg(unix)]
fn terminate(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    // SAFETY: kill(2) has no memory-safety preconditions.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "signals need a unix host"))
}

/// A process with at least one socket on a GDS port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortHolder {
    pub pid: u32,
    pub name: String,
    /// Ports held, with the TCP state of the socket.
    pub ports: Vec<(Port, TcpState)>,
}

/// Subset of kernel TCP states worth telling apart here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Listen,
    Established,
    Other(u8),
}

impl TcpState {
    fn from_hex(code: u8) -> Self {
        match code {
            0x01 => TcpState::Established,
            0x0A => TcpState::Listen,
            other => TcpState::Other(other),
        }
    }
}

impl std::fmt::Display for TcpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpState::Listen => f.write_str("LISTEN"),
            TcpState::Established => f.write_str("ESTABLISHED"),
            TcpState::Other(code) => write!(f, "0x{code:02X}"),
        }
    }
}

/// One row of `/proc/net/tcp` that sits on a GDS port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketEntry {
    port: Port,
    state: TcpState,
    inode: u64,
}

/// Parse a `/proc/net/tcp` or `tcp6` table, keeping rows whose local port
/// is a GDS port.
fn parse_tcp_table(text: &str) -> Vec<SocketEntry> {
    text.lines().skip(1).filter_map(parse_tcp_line).collect()
}

fn parse_tcp_line(line: &str) -> Option<SocketEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 10 {
        return None;
    }
    let (_, port_hex) = fields[1].rsplit_once(':')?;
    let port = Port::from_number(u16::from_str_radix(port_hex, 16).ok()?)?;
    let state = TcpState::from_hex(u8::from_str_radix(fields[3], 16).ok()?);
    let inode = fields[9].parse::<u64>().ok()?;
    // Inode 0 belongs to sockets in TIME_WAIT with no owner.
    (inode != 0).then_some(SocketEntry { port, state, inode })
}

/// Inode from an fd link target of the form `socket:[12345]`.
fn socket_inode(target: &str) -> Option<u64> {
    target.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

/// Processes under `proc_root` holding GDS ports, ordered by pid.
pub fn scan(proc_root: &Path) -> Result<Vec<PortHolder>> {
    let mut by_inode: HashMap<u64, SocketEntry> = HashMap::new();
    for table in ["net/tcp", "net/tcp6"] {
        match fs::read_to_string(proc_root.join(table)) {
            Ok(text) => by_inode.extend(parse_tcp_table(&text).into_iter().map(|e| (e.inode, e))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err).with_context(|| format!("failed to read {table}")),
        }
    }
    if by_inode.is_empty() {
        return Ok(Vec::new());
    }

    let mut holders: BTreeMap<u32, PortHolder> = BTreeMap::new();
    let entries = fs::read_dir(proc_root)
        .with_context(|| format!("failed to list {}", proc_root.display()))?;
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes may exit or deny access mid-scan; skip them.
        let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        for fd in fds.flatten() {
            let Ok(target) = fs::read_link(fd.path()) else {
                continue;
            };
            let Some(socket) = target.to_str().and_then(socket_inode).and_then(|i| by_inode.get(&i)) else {
                continue;
            };
            let holder = holders.entry(pid).or_insert_with(|| PortHolder {
                pid,
                name: process_name(&entry.path()),
                ports: Vec::new(),
            });
            if !holder.ports.contains(&(socket.port, socket.state)) {
                holder.ports.push((socket.port, socket.state));
            }
        }
    }

    let mut holders: Vec<PortHolder> = holders.into_values().collect();
    for holder in &mut holders {
        holder.ports.sort_by_key(|(port, _)| port.number());
    }
    Ok(holders)
}

fn process_name(pid_dir: &Path) -> String {
    fs::read_to_string(pid_dir.join("comm"))
        .map(|name| name.trim().to_owned())
        .unwrap_or_else(|_| "?".to_owned())
}

fn render(holders: &[PortHolder]) -> String {
    if holders.is_empty() {
        return String::from("no processes hold GDS ports\n");
    }
    let mut out = format!("{:>8}  {:<20} PORTS\n", "PID", "NAME");
    for holder in holders {
        let ports: Vec<String> = holder
            .ports
            .iter()
            .map(|(port, state)| format!("{port}:{} ({state})", port.number()))
            .collect();
        out.push_str(&format!("{:>8}  {:<20} {}\n", holder.pid, holder.name, ports.join(", ")));
    }
    out
}
