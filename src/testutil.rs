//! Tiny canned HTTP responder for tests that must not touch the network.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

pub struct Server {
  addr: String,
  requests: Arc<Mutex<Vec<String>>>,
}

impl Server {
  pub fn url(&self, path: &str) -> String {
    format!("http://{}{}", self.addr, path)
  }

  pub fn base(&self) -> String {
    format!("http://{}", self.addr)
  }

  /// Raw request heads received so far, in arrival order.
  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

pub fn response(status: u16, body: &str) -> Vec<u8> {
  format!("HTTP/1.1 {} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}", status, body.len(), body).into_bytes()
}

/// Serves every connection with `handler(request_head)` until the test process exits.
pub fn serve<F>(handler: F) -> Server
where F: Fn(&str) -> Vec<u8> + Send + Sync + 'static {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap().to_string();
  let requests = Arc::new(Mutex::new(Vec::new()));
  let seen = requests.clone();
  let handler = Arc::new(handler);
  thread::spawn(move || {
    for stream in listener.incoming() {
      let Ok(stream) = stream else { continue };
      let seen = seen.clone();
      let handler = handler.clone();
      thread::spawn(move || handle(stream, &seen, handler.as_ref()));
    }
  });
  Server { addr, requests }
}

fn handle<F>(mut stream: TcpStream, seen: &Mutex<Vec<String>>, handler: &F)
where F: Fn(&str) -> Vec<u8> {
  let mut head = Vec::new();
  let mut buf = [0u8; 1];
  while !head.ends_with(b"\r\n\r\n") {
    match stream.read(&mut buf) {
      Ok(1) => head.push(buf[0]),
      _ => return,
    }
  }
  let head = String::from_utf8_lossy(&head).to_string();
  seen.lock().unwrap().push(head.clone());
  let _ = stream.write_all(&handler(&head));
  let _ = stream.flush();
}
