//! TCP front-end: one thread accepting connections, one thread per
//! accepted connection, each handling exactly one request before closing.

use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long a blocked `accept()` may sit idle before re-checking the
/// running flag, so `stop()` takes effect promptly without busy-looping.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

use super::wire::{Payload, Request, Response};
use super::{Error, Repository, Result};

/// Listens on a TCP port and dispatches each connection's single request
/// into a shared [`Repository`].
pub struct Server {
    repo: Arc<Repository>,
    running: Arc<AtomicBool>,
    listener: TcpListener,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Binds `addr` (e.g. `"0.0.0.0:8080"`) against a repository rooted at
    /// `repo_path`.
    pub fn bind(addr: &str, repo_path: impl Into<std::path::PathBuf>) -> Result<Self> {
        let repo = Arc::new(Repository::open(repo_path)?);
        let listener = TcpListener::bind(addr)?;

        Ok(Self {
            repo,
            running: Arc::new(AtomicBool::new(false)),
            listener,
            workers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until [`Self::stop`] is called, spawning one
    /// worker thread per connection (mirrors the boost::asio accept loop
    /// this service's reference implementation used: spawn a thread, then
    /// immediately resume accepting).
    pub fn run(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.listener.set_nonblocking(true)?;
        log::info!("minigit server listening on {}", self.listener.local_addr()?);

        while self.running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    log::debug!("accepted connection from {}", peer);
                    stream.set_nonblocking(false)?;
                    let repo = Arc::clone(&self.repo);
                    let handle = std::thread::spawn(move || handle_connection(stream, &repo));
                    self.workers.push(handle);
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                }
            }
        }

        Ok(())
    }

    /// Clears the running flag and joins every worker spawned so far.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        log::info!("minigit server stopped");
    }
}

/// Reads one request, dispatches it, writes one response, then closes the
/// socket on every exit path, isolating one connection's failure from the rest.
fn handle_connection(mut stream: TcpStream, repo: &Repository) {
    let response = match Request::read(&mut stream) {
        Ok(request) => dispatch(repo, request),
        Err(e) => {
            log::warn!("malformed request: {}", e);
            Response::failure(format!("protocol error: {e}"))
        }
    };

    if let Err(e) = response.write(&mut stream) {
        log::warn!("failed to write response: {}", e);
    }
}

fn dispatch(repo: &Repository, request: Request) -> Response {
    match request {
        Request::SaveFile {
            name,
            branch,
            author,
            message,
            content,
        } => match repo.save_file(&name, &content, &author, &message, &branch) {
            Ok(hash) => Response::ok(format!("File saved with hash: {hash}"), Payload::None),
            Err(e) => Response::failure(describe(&e)),
        },
        Request::GetLatest { name, branch } => match repo.get_latest_version(&name, &branch) {
            Ok(content) => Response::ok("latest version retrieved", Payload::Content(content)),
            Err(e) => Response::failure(describe(&e)),
        },
        Request::GetVersion { name, version } => match repo.get_file_content(&name, version) {
            Ok(content) => Response::ok("version retrieved", Payload::Content(content)),
            Err(e) => Response::failure(describe(&e)),
        },
        Request::GetBranches => Response::ok("branches retrieved", Payload::Branches(repo.get_branches())),
        Request::GetHistory { name } => {
            Response::ok("history retrieved", Payload::History(repo.get_file_history(&name)))
        }
        Request::DeleteFile {
            name,
            branch,
            author,
            message,
        } => match repo.delete_file(&name, &author, &message, &branch) {
            Ok(hash) => Response::ok(format!("File deleted with hash: {hash}"), Payload::None),
            Err(e) => Response::failure(describe(&e)),
        },
        Request::RestoreFile {
            name,
            branch,
            author,
            message,
        } => match repo.restore_file(&name, &author, &message, &branch) {
            Ok(hash) => Response::ok(format!("File restored with hash: {hash}"), Payload::None),
            Err(e) => Response::failure(describe(&e)),
        },
        Request::DeleteBranch { name } => match repo.delete_branch(&name) {
            Ok(()) => Response::ok("branch deleted", Payload::None),
            Err(e) => Response::failure(describe(&e)),
        },
    }
}

fn describe(e: &Error) -> String {
    e.to_string()
}
