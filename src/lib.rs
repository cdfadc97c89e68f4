/*!
Tiny HTTP server that answers every request with its own url path.

The runtime is a single-threaded `mio` poll loop. Handlers receive a
complete `http::Request<Vec<u8>>` and return an `http::Response<Vec<u8>>`
which is serialized and written back on the same connection.

```rust,no_run
path_echo::start("127.0.0.1:3000", path_echo::echo_target).unwrap();
```
*/
#![recursion_limit="1024"]
#[macro_use] extern crate error_chain;
extern crate mio;
extern crate slab;
extern crate httparse;
extern crate http;
#[macro_use] extern crate log;

use std::io::{self, Read, Write};
use std::net::SocketAddr;
use mio::net::{TcpListener, TcpStream};

pub mod errors;
mod http_stream;
mod response;

use errors::*;
use http_stream::HttpStreamReader;


pub type Request = http::Request<Vec<u8>>;
pub type Response = http::Response<Vec<u8>>;

/// A parsed request whose body bytes are still being collected
pub(crate) type RequestHead = http::Request<()>;


/// Handler answering every request with its own request-target: the raw
/// url path plus query string, exactly as it appeared on the request
/// line. Method, headers, and body are ignored.
pub fn echo_target(req: Request) -> Response {
    http::Response::builder()
        .status(200)
        .header(http::header::CONTENT_TYPE, "text/html")
        .body(req.uri().to_string().into_bytes())
        .unwrap()
}


/// Bind `addr` and serve `func` until the process is terminated
pub fn start<F>(addr: &str, func: F) -> Result<()>
    where F: Fn(Request) -> Response
{
    Server::new(addr)?.start(func)
}


enum Socket {
    Listener {
        listener: TcpListener,
    },
    Stream {
        stream: TcpStream,
        reader: HttpStreamReader,
        write_buf: Vec<u8>,
        bytes_written: usize,
        keep_alive: bool,
    },
}
impl Socket {
    fn new_listener(l: TcpListener) -> Self {
        Socket::Listener { listener: l }
    }
    fn new_stream(s: TcpStream) -> Self {
        Socket::Stream {
            stream: s,
            reader: HttpStreamReader::new(),
            write_buf: Vec::with_capacity(1024),
            bytes_written: 0,
            keep_alive: false,
        }
    }
    fn continued_stream(stream: TcpStream,
                        reader: HttpStreamReader,
                        write_buf: Vec<u8>, bytes_written: usize,
                        keep_alive: bool) -> Self
    {
        Socket::Stream { stream, reader, write_buf, bytes_written, keep_alive }
    }
}


fn wants_keep_alive(req: &Request) -> bool {
    // HTTP/1.1 defaults to persistent connections
    match req.headers().get(http::header::CONNECTION).and_then(|v| v.to_str().ok()) {
        Some(v) => !v.eq_ignore_ascii_case("close"),
        None => true,
    }
}


pub struct Server {
    addr: SocketAddr,
    keep_alive: bool,
}
impl Server {
    pub fn new(addr: &str) -> Result<Server> {
        Ok(Server {
            addr: addr.parse()?,
            keep_alive: true,
        })
    }

    /// Toggle connection reuse after a response is written. On by default
    pub fn keep_alive(mut self, ka: bool) -> Server {
        self.keep_alive = ka;
        self
    }

    /// Bind the listening socket and run the poll loop forever,
    /// calling `func` once per complete request. The only way out
    /// is an error on the listener itself or process termination.
    pub fn start<F>(&self, func: F) -> Result<()>
        where F: Fn(Request) -> Response
    {
        let mut sockets = slab::Slab::with_capacity(1024);
        let server = TcpListener::bind(&self.addr)?;

        let poll = mio::Poll::new()?;
        {
            let entry = sockets.vacant_entry();
            let server_token = entry.key().into();
            poll.register(&server, server_token,
                          mio::Ready::readable(),
                          mio::PollOpt::edge() | mio::PollOpt::oneshot())?;
            entry.insert(Socket::new_listener(server));
        }

        info!("** Listening on {} **", self.addr);

        let mut events = mio::Events::with_capacity(1024);
        loop {
            poll.poll(&mut events, None)?;
            for e in &events {
                let token = e.token();
                if !sockets.contains(token.into()) { continue }
                match sockets.remove(token.into()) {
                    Socket::Listener { listener } => {
                        if e.readiness().is_readable() {
                            match listener.accept() {
                                Ok((sock, addr)) => {
                                    debug!("opened socket to: {:?}", addr);
                                    let entry = sockets.vacant_entry();
                                    let token = entry.key().into();
                                    poll.register(&sock, token,
                                                  mio::Ready::readable(),
                                                  mio::PollOpt::edge() | mio::PollOpt::oneshot())?;
                                    entry.insert(Socket::new_stream(sock));
                                }
                                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => (),
                                Err(e) => return Err(e.into()),
                            }
                        }
                        // reregister listener
                        let entry = sockets.vacant_entry();
                        let token = entry.key().into();
                        poll.reregister(&listener, token,
                                        mio::Ready::readable(),
                                        mio::PollOpt::edge() | mio::PollOpt::oneshot())?;
                        entry.insert(Socket::new_listener(listener));
                    }
                    Socket::Stream { mut stream, mut reader, mut write_buf, mut bytes_written, mut keep_alive } => {
                        let readiness = e.readiness();
                        debug!("stream, {:?}, {:?}", token, readiness);
                        if write_buf.is_empty() && readiness.is_readable() {
                            let mut buf = [0; 256];
                            let stream_close = loop {
                                match stream.read(&mut buf) {
                                    Ok(0) => {
                                        // the stream has ended for real
                                        break true
                                    }
                                    Ok(n) => {
                                        reader.receive_chunk(&buf[..n]);
                                    }
                                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                        break false
                                    }
                                    Err(e) => {
                                        debug!("read error on {:?}: {}", token, e);
                                        break true
                                    }
                                }
                            };
                            // an EOF only means the peer is done sending;
                            // anything fully buffered still gets an answer.
                            // serve every complete request in order, carrying
                            // pipelined leftover bytes into the next reader
                            loop {
                                match reader.try_build_request() {
                                    Ok(Some(head)) => {
                                        let (parts, ()) = head.into_parts();
                                        let request = http::Request::from_parts(parts, reader.body().to_vec());
                                        keep_alive = self.keep_alive
                                            && !stream_close
                                            && wants_keep_alive(&request);
                                        let resp = func(request);
                                        write_buf.extend_from_slice(&response::serialize(&resp));
                                        let mut next = HttpStreamReader::new();
                                        next.receive_chunk(reader.leftover());
                                        reader = next;
                                        if !keep_alive { break }
                                    }
                                    Ok(None) => {
                                        // request still incomplete, wait for more data
                                        break
                                    }
                                    Err(e) => {
                                        warn!("unable to handle request on {:?}: {}", token, e);
                                        write_buf.extend_from_slice(&response::bad_request());
                                        keep_alive = false;
                                        break
                                    }
                                }
                            }
                            if stream_close && write_buf.is_empty() {
                                debug!("killing socket: {:?}", token);
                                continue
                            }
                        }
                        let mut done_write = false;
                        let mut write_dead = false;
                        if !write_buf.is_empty() {
                            loop {
                                match stream.write(&write_buf[bytes_written..]) {
                                    Ok(0) => {
                                        break
                                    }
                                    Ok(n) => {
                                        bytes_written += n;
                                        if bytes_written == write_buf.len() { break }
                                    }
                                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                        break
                                    }
                                    Err(e) => {
                                        debug!("write error on {:?}: {}", token, e);
                                        write_dead = true;
                                        break
                                    }
                                }
                            }
                            done_write = write_buf.len() == bytes_written;
                        }
                        if write_dead {
                            // dropping the stream closes the connection
                            continue
                        }
                        if done_write && keep_alive {
                            // responses fully flushed, recycle the connection,
                            // keeping any partial next request already read
                            let entry = sockets.vacant_entry();
                            let token = entry.key().into();
                            poll.reregister(&stream, token,
                                            mio::Ready::readable(),
                                            mio::PollOpt::edge() | mio::PollOpt::oneshot())?;
                            entry.insert(Socket::continued_stream(stream, reader, Vec::with_capacity(1024), 0, false));
                        } else if !done_write {
                            // we're not done with this socket yet,
                            // ask for writability only once a response is pending
                            let interest = if write_buf.is_empty() {
                                mio::Ready::readable()
                            } else {
                                mio::Ready::readable() | mio::Ready::writable()
                            };
                            let entry = sockets.vacant_entry();
                            let token = entry.key().into();
                            poll.reregister(&stream, token, interest,
                                            mio::PollOpt::edge() | mio::PollOpt::oneshot())?;
                            entry.insert(
                                Socket::continued_stream(
                                    stream, reader,
                                    write_buf, bytes_written, keep_alive
                                    )
                                );
                        }
                        // done_write without keep_alive: the stream drops
                        // here and the connection closes
                    }
                }
            }
        }
    }
}
