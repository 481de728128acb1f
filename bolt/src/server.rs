//! Listener and accept loop
//!
//! ```no_run
//! use bolt::{conf::Broker, Server};
//!
//! let handle = Server::new(Broker::default()).start().unwrap();
//! println!("listening on {}", handle.local_addr());
//! handle.shutdown();
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, SockAddr, Socket, Type};

use crate::client::{ClientHandle, ClientOptions, Connection};
use crate::conf::Broker;
use crate::context::ServerContext;
use crate::manager::ManagerHandle;
use crate::processor::Processor;
use crate::types::{Message, MessageKind, Meta, Reason, Value};
use crate::Result;

const LISTENER: Token = Token(0);
pub const PROP_VERSION: &str = "VERSION";

pub struct Server {
    scx: ServerContext,
}

impl Server {
    pub fn new(cfg: Broker) -> Self {
        Self { scx: ServerContext::new(cfg) }
    }

    #[inline]
    pub fn context(&self) -> &ServerContext {
        &self.scx
    }

    /// Binds the listener and starts the processor and accept threads.
    pub fn start(self) -> Result<ServerHandle> {
        let cfg = &self.scx.cfg;
        let listener = bind(cfg.laddr(), cfg.backlog_size, cfg.reuseaddr)?;
        let local_addr = listener.local_addr()?;
        log::info!("bolt broker listening on {}", local_addr);

        let processor = Processor::spawn(self.scx.clone())?;
        let acceptor = Acceptor { scx: self.scx.clone(), listener, managers: Vec::new() };
        let accept = thread::Builder::new().name("bolt-accept".into()).spawn(move || acceptor.run())?;

        Ok(ServerHandle { scx: self.scx, local_addr, threads: vec![accept, processor] })
    }
}

pub struct ServerHandle {
    scx: ServerContext,
    local_addr: SocketAddr,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[inline]
    pub fn context(&self) -> &ServerContext {
        &self.scx
    }

    /// Stops accepting, fails every connection and waits for all threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if !self.scx.stop() {
            return;
        }
        log::info!("bolt broker on {} shutting down", self.local_addr);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                log::error!("a broker thread panicked");
            }
        }
        for client in self.scx.clients.iter() {
            client.value().failed(&self.scx, Reason::Shutdown);
        }
        self.scx.clients.clear();
        self.scx.stats.refresh(&self.scx);
        log::info!("bolt broker stopped, stats: {}", self.scx.stats.to_json());
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Acceptor {
    scx: ServerContext,
    listener: TcpListener,
    managers: Vec<ManagerHandle>,
}

impl Acceptor {
    fn run(mut self) {
        if let Err(e) = self.serve() {
            log::error!("accept loop failed, {}", e);
        }
        for manager in self.managers.iter_mut() {
            manager.shutdown();
        }
    }

    fn serve(&mut self) -> Result<()> {
        let mut poll = Poll::new()?;
        poll.registry().register(&mut self.listener, LISTENER, Interest::READABLE)?;
        let mut events = Events::with_capacity(16);

        while self.scx.is_running() {
            if let Err(e) = poll.poll(&mut events, Some(self.scx.cfg.selection_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            if events.is_empty() {
                continue;
            }
            loop {
                match self.listener.accept() {
                    Ok((stream, peer)) => {
                        if let Err(e) = self.accept(stream, peer) {
                            log::warn!("connection from {} rejected, {}", peer, e);
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("accept failed, {}", e);
                        thread::sleep(Duration::from_millis(10));
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nodelay(true)?;
        let idx = self.manager()?;
        let manager = &self.managers[idx];

        let id = self.scx.next_client_id();
        let handle =
            Arc::new(ClientHandle::new(id, peer, ClientOptions::from(&self.scx.cfg), manager.mailbox()));
        self.scx.clients.insert(id, handle.clone());
        self.scx.stats.connections.inc();
        log::info!("{} connected, I/O manager {}", handle, manager.id());

        handle.send_message(&welcome()?);
        manager.assign(Connection::new(handle, stream))
    }

    /// Index of the first manager with spare capacity, spawning one if needed.
    fn manager(&mut self) -> Result<usize> {
        let capacity = self.scx.cfg.clients_per_manager;
        let idx = match self.managers.iter().position(|m| m.has_capacity(capacity)) {
            Some(idx) => idx,
            None => {
                let manager = ManagerHandle::spawn(self.managers.len(), self.scx.clone())?;
                self.managers.push(manager);
                self.managers.len() - 1
            }
        };
        Ok(idx)
    }
}

fn welcome() -> Result<Message> {
    let mut meta = Meta::new();
    meta.add(PROP_VERSION, Value::String(env!("CARGO_PKG_VERSION").into()));
    Ok(Message::with_meta(MessageKind::Welcome, meta)?)
}

fn bind(laddr: SocketAddr, backlog: i32, reuseaddr: bool) -> Result<TcpListener> {
    let builder = match laddr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    builder.set_reuse_address(reuseaddr)?;
    builder.bind(&SockAddr::from(laddr))?;
    builder.listen(backlog)?;
    builder.set_nonblocking(true)?;
    Ok(TcpListener::from_std(std::net::TcpListener::from(builder)))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{IpAddr, Ipv4Addr, TcpStream as StdTcpStream};

    use bytes::Bytes;

    use super::*;
    use bolt_codec::Unpacker;

    struct TestClient {
        stream: StdTcpStream,
        unpacker: Unpacker,
        received: Vec<Message>,
    }

    impl TestClient {
        fn connect(addr: SocketAddr) -> Self {
            let stream = StdTcpStream::connect(addr).unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
            let mut client = Self { stream, unpacker: Unpacker::new(0), received: Vec::new() };
            let welcome = client.next();
            assert_eq!(welcome.kind().unwrap(), MessageKind::Welcome);
            assert_eq!(welcome.meta().unwrap().unwrap().get_str(PROP_VERSION), Some(env!("CARGO_PKG_VERSION")));
            client
        }

        fn send(&mut self, msg: &Message) {
            self.stream.write_all(msg.bytes()).unwrap();
        }

        fn next(&mut self) -> Message {
            let mut buf = [0u8; 4096];
            while self.received.is_empty() {
                let n = self.stream.read(&mut buf).unwrap();
                assert!(n > 0, "connection closed");
                let received = &mut self.received;
                self.unpacker.unpack(&buf[..n], |m| received.push(m)).unwrap();
            }
            self.received.remove(0)
        }
    }

    fn request(kind: MessageKind, id: &str, topic: &str) -> Message {
        let mut meta = Meta::new();
        meta.set_id(id.to_owned()).set_topic(topic.to_owned());
        Message::with_meta(kind, meta).unwrap()
    }

    fn publish(topic: &str, body: &'static [u8]) -> Message {
        let mut meta = Meta::new();
        meta.set_topic(topic.to_owned());
        Message::new(MessageKind::Publish, Some(meta), Some(Bytes::from_static(body))).unwrap()
    }

    fn start(cfg: Broker) -> ServerHandle {
        let cfg = Broker { host: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 0, ..cfg };
        Server::new(cfg).start().unwrap()
    }

    #[test]
    fn test_end_to_end() {
        let server = start(Broker::default());
        let addr = server.local_addr();

        let mut sub = TestClient::connect(addr);
        let mut publisher = TestClient::connect(addr);

        sub.send(&request(MessageKind::Subscribe, "1", "news.*"));
        let ack = sub.next();
        assert_eq!(ack.kind().unwrap(), MessageKind::Ack);
        assert_eq!(ack.meta().unwrap().unwrap().corr_id().map(|c| c.to_string()), Some("1".into()));
        assert!(ack.meta().unwrap().unwrap().get(crate::processor::PROP_ERROR).is_none());

        let msg = publish("news.today", b"headline");
        publisher.send(&msg);
        let got = sub.next();
        assert_eq!(got, msg);
        assert_eq!(got.body().unwrap().map(|b| &b[..]), Some(&b"headline"[..]));

        let echo = Message::new(MessageKind::Echo, None, Some(Bytes::from_static(b"ping"))).unwrap();
        publisher.send(&echo);
        assert_eq!(publisher.next(), echo);

        sub.send(&request(MessageKind::Subscribe, "2", "bad..topic"));
        let ack = sub.next();
        assert!(matches!(
            ack.meta().unwrap().unwrap().get(crate::processor::PROP_ERROR),
            Some(Value::String(_))
        ));

        assert_eq!(server.context().clients.len(), 2);
        server.shutdown();
    }

    #[test]
    fn test_goodbye_and_managers() {
        let server = start(Broker { clients_per_manager: 1, ..Default::default() });
        let addr = server.local_addr();

        let mut a = TestClient::connect(addr);
        let _b = TestClient::connect(addr);
        assert_eq!(server.context().stats.managers.count(), 2);

        a.send(&Message::empty(MessageKind::Goodbye).unwrap());
        let mut buf = [0u8; 16];
        assert_eq!(a.stream.read(&mut buf).unwrap_or(0), 0);

        let mut waited = 0;
        while server.context().clients.len() != 1 && waited < 50 {
            thread::sleep(Duration::from_millis(20));
            waited += 1;
        }
        assert_eq!(server.context().clients.len(), 1);
        server.shutdown();
    }

    #[test]
    fn test_oversized_message_closes_connection() {
        let server = start(Broker { max_message_size: bolt_utils::Bytesize(16), ..Default::default() });
        let mut client = TestClient::connect(server.local_addr());
        client.send(&publish("big", b"this body is well past sixteen bytes"));
        let mut buf = [0u8; 16];
        assert_eq!(client.stream.read(&mut buf).unwrap_or(0), 0);
        server.shutdown();
    }
}
