use std::net::{Ipv4Addr, TcpListener};

/// Whether `port` can be bound on the loopback interface right now.
pub fn local_port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_port_is_not_available() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!local_port_available(port));
        drop(listener);
    }
}
