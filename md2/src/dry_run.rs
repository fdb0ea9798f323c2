//! A loopback PMAC stub for `--dry-run`: binds a local TCP port and
//! acknowledges every request the link sends, standing in for a real
//! Turbo-PMAC so every other subsystem starts and runs exactly as it would
//! in production. `GETMEM` uploads get back `length` zero bytes (a status
//! block full of zeroes decodes as every axis idle, not homed); everything
//! else gets a single ack byte.
//!
//! `md2_link::PmacLink` hardcodes its own `TcpStream::connect` and has no
//! generic transport injection point, so the substitution happens here
//! instead of inside that crate: `PmacLink::new` is simply pointed at this
//! stub's address.

use md2_proto::dpram::ACK_BYTE;
use md2_proto::header::{request_code, Header, HEADER_LEN};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};

/// Bind a stub server on an OS-assigned loopback port and spawn its
/// accept/serve thread. Returns the address to hand to `PmacLink::new`.
pub fn spawn() -> io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?.to_string();
    std::thread::Builder::new()
        .name("md2-dry-run-pmac".into())
        .spawn(move || serve(listener))
        .expect("failed to spawn dry-run PMAC stub thread");
    Ok(addr)
}

fn serve(listener: TcpListener) {
    for incoming in listener.incoming() {
        let Ok(stream) = incoming else { continue };
        std::thread::Builder::new()
            .name("md2-dry-run-conn".into())
            .spawn(move || {
                if let Err(e) = serve_connection(stream) {
                    tracing::debug!("dry-run PMAC stub connection ended: {e}");
                }
            })
            .expect("failed to spawn dry-run PMAC stub connection thread");
    }
}

fn serve_connection(mut stream: TcpStream) -> io::Result<()> {
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        stream.read_exact(&mut header_buf)?;
        let header = Header::from_bytes(&header_buf);

        if header.request_type == md2_proto::header::request_type::DOWNLOAD && header.length > 0 {
            let mut payload = vec![0u8; header.length as usize];
            stream.read_exact(&mut payload)?;
        }

        if header.request_code == request_code::GETMEM {
            stream.write_all(&vec![0u8; header.length as usize])?;
        } else {
            stream.write_all(&[ACK_BYTE])?;
        }
    }
}
