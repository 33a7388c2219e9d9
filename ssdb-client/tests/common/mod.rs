#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ssdb_client::{ClientConfig, ConnectionConfig, PoolConfig, Status};
use ssdb_common::encode_response;

/// What the mock server does after reading one command.
pub enum Action {
    /// Write these bytes back.
    Respond(Vec<u8>),
    /// Drop the connection without answering.
    Close,
}

/// Commands seen by the mock server, per accepted connection.
pub type Log = Arc<Mutex<Vec<(usize, Vec<Vec<u8>>)>>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ssdb_client=debug")
        .with_test_writer()
        .try_init();
}

/// Accepts up to `connections` clients in sequence and answers each command
/// through `handler(connection_index, args)`. Returns the port and the log.
pub fn spawn_server<F>(connections: usize, mut handler: F) -> (u16, Log)
where
    F: FnMut(usize, &[Vec<u8>]) -> Action + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();

    thread::spawn(move || {
        for conn_idx in 0..connections {
            let (mut stream, _) = match listener.accept() {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            loop {
                let args = match read_command(&mut reader) {
                    Ok(Some(args)) => args,
                    _ => break,
                };
                seen.lock().unwrap().push((conn_idx, args.clone()));
                match handler(conn_idx, &args) {
                    Action::Respond(bytes) => {
                        if stream.write_all(&bytes).is_err() {
                            break;
                        }
                        let _ = stream.flush();
                    }
                    Action::Close => break,
                }
            }
        }
    });

    (port, log)
}

/// Reads one command block; `Ok(None)` on a clean close.
fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut args = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        line.pop();
        if line.is_empty() {
            return Ok(Some(args));
        }
        let len: usize = std::str::from_utf8(&line)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "length"))?;
        let mut data = vec![0u8; len + 1];
        reader.read_exact(&mut data)?;
        data.pop();
        args.push(data);
    }
}

pub fn respond(status: Status, fields: &[&str]) -> Action {
    let mut out = Vec::new();
    encode_response(status, fields.iter().map(|field| field.as_bytes()), &mut out);
    Action::Respond(out)
}

pub fn ok(fields: &[&str]) -> Action {
    respond(Status::Ok, fields)
}

pub fn config(port: u16, pool: PoolConfig) -> ClientConfig {
    let mut connection = ConnectionConfig::new("127.0.0.1", port);
    connection.read_timeout = Some(Duration::from_secs(2));
    connection.write_timeout = Some(Duration::from_secs(2));
    connection.connect_timeout = Some(Duration::from_secs(2));
    ClientConfig { connection, pool }
}

/// Commands logged so far, as `(connection index, command name)`.
pub fn names(log: &Log) -> Vec<(usize, String)> {
    log.lock()
        .unwrap()
        .iter()
        .map(|(idx, args)| (*idx, String::from_utf8_lossy(&args[0]).into_owned()))
        .collect()
}
