//! UDP and TCP listeners

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::Builder;
use std::time::Duration;

use derive_more::{Display, Error, From};

use crate::dns::context::ServerContext;
use crate::dns::handler::HandlerOutcome;
use crate::dns::netutil::{read_frame, write_frame};

/// Largest datagram accepted
const MAX_DATAGRAM: usize = 65535;

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ServerError>;

macro_rules! ignore_or_report {
    ( $x:expr, $message:expr ) => {
        match $x {
            Ok(_) => {}
            Err(e) => {
                log::info!("{}: {}", $message, e);
                return;
            }
        };
    };
}

/// Common trait for DNS servers
pub trait DnsServer {
    /// Binds the socket and starts serving
    ///
    /// This method should _NOT_ block. Servers spawn their own threads and
    /// return the address they are listening on.
    fn run_server(self) -> Result<SocketAddr>;
}

/// The UDP server
///
/// Datagrams are read on a single thread and queued for a fixed pool of
/// worker threads. Every message the handler produces goes out as its own
/// datagram.
pub struct DnsUdpServer {
    context: Arc<ServerContext>,
    request_queue: Arc<Mutex<VecDeque<(SocketAddr, Vec<u8>)>>>,
    request_cond: Arc<Condvar>,
    thread_count: usize,
}

impl DnsUdpServer {
    pub fn new(context: Arc<ServerContext>, thread_count: usize) -> DnsUdpServer {
        DnsUdpServer {
            context,
            request_queue: Arc::new(Mutex::new(VecDeque::new())),
            request_cond: Arc::new(Condvar::new()),
            thread_count,
        }
    }

    fn process_request(
        socket: &UdpSocket,
        context: &ServerContext,
        src: SocketAddr,
        request: &[u8],
    ) {
        let messages = match context.handler.handle(request, &src) {
            HandlerOutcome::Respond(messages) => messages,
            HandlerOutcome::Drop => return,
        };

        for message in messages {
            ignore_or_report!(
                socket.send_to(&message, src),
                "Failed to send response packet"
            );
        }
    }

    fn spawn_request_handler(&self, thread_id: usize, socket: UdpSocket) -> std::io::Result<()> {
        let context = self.context.clone();
        let request_cond = self.request_cond.clone();
        let request_queue = self.request_queue.clone();

        let name = format!("DnsUdpServer-request-{}", thread_id);
        Builder::new().name(name).spawn(move || loop {
            let (src, request) = {
                let mut queue = match request_queue.lock() {
                    Ok(queue) => queue,
                    Err(_) => {
                        log::error!("UDP request queue is poisoned");
                        return;
                    }
                };

                loop {
                    if let Some(item) = queue.pop_front() {
                        break item;
                    }
                    queue = match request_cond.wait(queue) {
                        Ok(queue) => queue,
                        Err(_) => {
                            log::error!("UDP request queue is poisoned");
                            return;
                        }
                    };
                }
            };

            Self::process_request(&socket, &context, src, &request);
        })?;

        Ok(())
    }

    fn spawn_incoming_handler(self, socket: UdpSocket) -> std::io::Result<()> {
        Builder::new()
            .name("DnsUdpServer-incoming".into())
            .spawn(move || {
                let mut buf = vec![0; MAX_DATAGRAM];
                loop {
                    let (len, src) = match socket.recv_from(&mut buf) {
                        Ok(x) => x,
                        Err(e) => {
                            log::info!("Failed to read from UDP socket: {:?}", e);
                            continue;
                        }
                    };

                    self.context
                        .statistics
                        .udp_query_count
                        .fetch_add(1, Ordering::Release);

                    self.enqueue_request(src, buf[..len].to_vec());
                }
            })?;

        Ok(())
    }

    fn enqueue_request(&self, src: SocketAddr, request: Vec<u8>) {
        match self.request_queue.lock() {
            Ok(mut queue) => {
                queue.push_back((src, request));
                self.request_cond.notify_one();
            }
            Err(e) => {
                log::info!("Failed to send UDP request for processing: {}", e);
            }
        }
    }
}

impl DnsServer for DnsUdpServer {
    fn run_server(self) -> Result<SocketAddr> {
        let socket = UdpSocket::bind(self.context.config.listen_addr())?;
        let local_addr = socket.local_addr()?;

        for thread_id in 0..self.thread_count {
            let socket_clone = match socket.try_clone() {
                Ok(x) => x,
                Err(e) => {
                    log::info!("Failed to clone socket when starting UDP server: {:?}", e);
                    continue;
                }
            };

            self.spawn_request_handler(thread_id, socket_clone)?;
        }

        self.spawn_incoming_handler(socket)?;
        log::info!("Listening for UDP queries on {}", local_addr);

        Ok(local_addr)
    }
}

/// TCP DNS server
///
/// Each accepted connection gets its own thread, which serves framed queries
/// one after another until the peer closes the connection or stays idle for
/// longer than the configured timeout.
pub struct DnsTcpServer {
    context: Arc<ServerContext>,
}

impl DnsTcpServer {
    pub fn new(context: Arc<ServerContext>) -> DnsTcpServer {
        DnsTcpServer { context }
    }

    fn handle_connection(context: &ServerContext, mut stream: TcpStream, peer: SocketAddr) {
        let idle_timeout = Duration::from_secs(context.config.tcp_idle_timeout_secs);
        ignore_or_report!(
            stream.set_read_timeout(Some(idle_timeout)),
            "Failed to set TCP read timeout"
        );

        loop {
            let request = match read_frame(&mut stream) {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    log::debug!("{}: closing idle connection", peer);
                    break;
                }
                Err(e) => {
                    log::info!("{}: failed to read query: {}", peer, e);
                    break;
                }
            };

            context
                .statistics
                .tcp_query_count
                .fetch_add(1, Ordering::Release);

            if let HandlerOutcome::Respond(messages) = context.handler.handle(&request, &peer) {
                for message in messages {
                    ignore_or_report!(
                        write_frame(&mut stream, &message),
                        "Failed to write response packet"
                    );
                }
            }
        }

        let _ = stream.shutdown(Shutdown::Both);
    }
}

impl DnsServer for DnsTcpServer {
    fn run_server(self) -> Result<SocketAddr> {
        let socket = TcpListener::bind(self.context.config.listen_addr())?;
        let local_addr = socket.local_addr()?;

        Builder::new()
            .name("DnsTcpServer-incoming".into())
            .spawn(move || {
                for (conn_id, wrap_stream) in socket.incoming().enumerate() {
                    let stream = match wrap_stream {
                        Ok(stream) => stream,
                        Err(err) => {
                            log::info!("Failed to accept TCP connection: {:?}", err);
                            continue;
                        }
                    };

                    let peer = match stream.peer_addr() {
                        Ok(peer) => peer,
                        Err(err) => {
                            log::info!("Dropping TCP connection without peer: {:?}", err);
                            continue;
                        }
                    };

                    let context = self.context.clone();
                    let name = format!("DnsTcpServer-conn-{}", conn_id);
                    let spawned = Builder::new()
                        .name(name)
                        .spawn(move || Self::handle_connection(&context, stream, peer));

                    if let Err(e) = spawned {
                        log::info!("Failed to spawn TCP connection thread: {}", e);
                    }
                }
            })?;

        log::info!("Listening for TCP queries on {}", local_addr);

        Ok(local_addr)
    }
}
