//! Camada de transporte: um socket TCP, uma transação por vez.
//!
//! `transact` escreve o frame inteiro e faz exatamente uma leitura de até
//! [`RECV_BUFFER_SIZE`] bytes. Não há remontagem de frames parciais: o
//! controlador entrega uma resposta completa por leitura dentro do timeout.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Tamanho do buffer de leitura por transação.
pub const RECV_BUFFER_SIZE: usize = 1024;

/// Timeout padrão de conexão e leitura.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Falha ao estabelecer a conexão.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Falha ao resolver {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("Nenhum endereço para {0}")]
    NoAddress(String),

    #[error("Falha ao conectar em {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Falha ao configurar socket: {0}")]
    Configure(std::io::Error),
}

/// Falha durante uma transação já conectada.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Erro de escrita: {0}")]
    Write(std::io::Error),

    #[error("Timeout aguardando resposta")]
    Timeout,

    #[error("Erro de leitura: {0}")]
    Read(std::io::Error),

    #[error("Conexão encerrada pelo controlador")]
    Closed,
}

/// Uma conexão capaz de trocar um frame por uma resposta.
pub trait Transport: Send {
    /// Envia `payload` e retorna os bytes de uma única leitura.
    fn transact(&mut self, payload: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Fecha a conexão. Idempotente.
    fn close(&mut self);
}

/// Fábrica de conexões, usada pela política de reconexão do cliente.
pub trait Connector: Send {
    type Conn: Transport;

    fn connect(&self) -> Result<Self::Conn, ConnectionError>;

    /// Descrição do destino para logs.
    fn target(&self) -> String;
}

// ──────────────────────────────────────────────
// TCP
// ──────────────────────────────────────────────

/// Conexão TCP com o controlador.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

/// Tempo restante até `deadline`; `None` se esgotado.
fn attempt_budget(deadline: Instant, now: Instant) -> Option<Duration> {
    let left = deadline.saturating_duration_since(now);
    (!left.is_zero()).then_some(left)
}

impl TcpTransport {
    /// Abre o socket com timeout de conexão e de leitura/escrita.
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|source| ConnectionError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?
            .collect();

        // Um único prazo para todos os endereços resolvidos
        let deadline = Instant::now() + connect_timeout;
        let mut last_err = None;
        for addr in addrs {
            let Some(budget) = attempt_budget(deadline, Instant::now()) else {
                debug!("Prazo de conexão esgotado antes de tentar {addr}");
                break;
            };
            match TcpStream::connect_timeout(&addr, budget) {
                Ok(stream) => {
                    stream
                        .set_read_timeout(Some(io_timeout))
                        .map_err(ConnectionError::Configure)?;
                    stream
                        .set_write_timeout(Some(io_timeout))
                        .map_err(ConnectionError::Configure)?;
                    stream.set_nodelay(true).ok();
                    info!("Conectado ao controlador em {addr}");
                    return Ok(Self {
                        stream: Some(stream),
                        peer: addr,
                    });
                }
                Err(source) => {
                    debug!("Falha ao conectar em {addr}: {source}");
                    last_err = Some(ConnectionError::Connect { addr, source });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| ConnectionError::NoAddress(format!("{host}:{port}"))))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn transact(&mut self, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        stream.write_all(payload).map_err(TransportError::Write)?;

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        match stream.read(&mut buf) {
            Ok(0) => Err(TransportError::Closed),
            Ok(size) => Ok(buf[..size].to_vec()),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Err(TransportError::Timeout)
            }
            Err(e) => Err(TransportError::Read(e)),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Socket pode já estar inutilizável
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Conexão com {} fechada", self.peer);
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Conector TCP configurado com host, porta e timeouts.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_TIMEOUT,
            io_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, io_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.io_timeout = io_timeout;
        self
    }
}

impl Connector for TcpConnector {
    type Conn = TcpTransport;

    fn connect(&self) -> Result<TcpTransport, ConnectionError> {
        TcpTransport::connect(&self.host, self.port, self.connect_timeout, self.io_timeout)
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn short() -> Duration {
        Duration::from_millis(300)
    }

    #[test]
    fn transact_roundtrip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).unwrap();
            sock.write_all(b"/00ID reply\r").unwrap();
            buf[..n].to_vec()
        });

        let mut t = TcpTransport::connect("127.0.0.1", port, short(), short()).unwrap();
        assert_eq!(t.peer().port(), port);
        let reply = t.transact(b"ping\r").unwrap();
        assert_eq!(reply, b"/00ID reply\r");
        assert_eq!(server.join().unwrap(), b"ping\r");
        t.close();
        t.close();
    }

    #[test]
    fn oversized_reply_is_cut_at_one_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            sock.read(&mut buf).unwrap();
            sock.write_all(&[b'A'; 2000]).unwrap();
        });

        let mut t = TcpTransport::connect("127.0.0.1", port, short(), short()).unwrap();
        let reply = t.transact(b"/00RNF000018\r").unwrap();
        assert!(!reply.is_empty());
        assert!(reply.len() <= RECV_BUFFER_SIZE);
        server.join().unwrap();
    }

    #[test]
    fn connect_budget_is_shared() {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(500);
        assert_eq!(attempt_budget(deadline, now), Some(Duration::from_millis(500)));
        assert_eq!(
            attempt_budget(deadline, now + Duration::from_millis(200)),
            Some(Duration::from_millis(300))
        );
        assert_eq!(attempt_budget(deadline, deadline), None);
        assert_eq!(attempt_budget(deadline, deadline + Duration::from_secs(1)), None);
    }

    #[test]
    fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(600));
            drop(sock);
        });

        let mut t = TcpTransport::connect("127.0.0.1", port, short(), short()).unwrap();
        assert!(matches!(t.transact(b"x"), Err(TransportError::Timeout)));
        server.join().unwrap();
    }

    #[test]
    fn closed_peer_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (sock, _) = listener.accept().unwrap();
            drop(sock);
        });

        let mut t = TcpTransport::connect("127.0.0.1", port, short(), short()).unwrap();
        server.join().unwrap();
        // Dependendo da plataforma: EOF ou reset
        assert!(t.transact(b"x").is_err());
    }

    #[test]
    fn transact_after_close_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut t = TcpTransport::connect("127.0.0.1", port, short(), short()).unwrap();
        t.close();
        assert!(matches!(t.transact(b"x"), Err(TransportError::Closed)));
    }

    #[test]
    fn refused_connection_is_connection_error() {
        // Reserva uma porta e libera para garantir recusa
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let err = TcpTransport::connect("127.0.0.1", port, short(), short()).err();
        assert!(matches!(err, Some(ConnectionError::Connect { .. })));
    }

    #[test]
    fn connector_describes_target() {
        let c = TcpConnector::new("10.0.0.5", 20256);
        assert_eq!(c.target(), "10.0.0.5:20256");
        assert_eq!(c.connect_timeout, DEFAULT_TIMEOUT);
    }
}
