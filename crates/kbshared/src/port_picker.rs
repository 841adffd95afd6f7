//
// port_picker.rs
//
// Copyright (C) 2024-2025 Posit Software, PBC. All rights reserved.
// Licensed under the MIT License. See LICENSE.txt for license information.
//
//

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

/// Checks whether something is already listening on the given port.
///
/// A kernel left running by a previous session keeps its ports bound; a
/// successful connection within one second means the port is taken.
pub fn is_port_in_use(ip: &str, port: u16) -> bool {
    let addr: SocketAddr = match format!("{}:{}", ip, port).parse() {
        Ok(addr) => addr,
        Err(_) => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)),
    };
    TcpStream::connect_timeout(&addr, Duration::from_secs(1)).is_ok()
}
