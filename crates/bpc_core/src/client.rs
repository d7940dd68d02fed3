//! Cliente do controlador: vocabulário de comandos + política de reconexão.
//!
//! Qualquer falha de transação (I/O, timeout, decodificação) fecha a conexão
//! atual e faz **uma** tentativa de reconexão. A leitura daquele ciclo vira
//! [`Reading::Fault`]; o próximo ciclo de polling simplesmente tenta de novo.

use crate::protocol::{self, Command, ProtocolError};
use crate::transport::{ConnectionError, Connector, Transport, TransportError};
use crate::types::{Channels, FaultKind, Reading};
use tracing::{debug, info, warn};

/// Erros visíveis para quem chama `identify`/`read_clock`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Sem conexão com o controlador")]
    NotConnected,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ClientError {
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            ClientError::NotConnected => FaultKind::Disconnected,
            ClientError::Connection(_) => FaultKind::Connection,
            ClientError::Transport(_) => FaultKind::Transport,
            ClientError::Protocol(_) => FaultKind::Decode,
        }
    }
}

/// Fonte de leituras dos 24 canais, consumida pela engine de polling.
pub trait ChannelSource: Send {
    /// Executa uma aquisição. Nunca falha: erros viram [`Reading::Fault`].
    fn read(&mut self) -> Reading;

    /// Libera a conexão, se houver.
    fn close(&mut self);
}

/// Cliente do controlador sobre um [`Connector`].
pub struct ControllerClient<C: Connector> {
    connector: C,
    conn: Option<C::Conn>,
    /// Falha da última tentativa de conexão, reportada na próxima transação
    connect_error: Option<ConnectionError>,
    reconnects: u64,
}

impl<C: Connector> ControllerClient<C> {
    /// Cria o cliente e tenta conectar uma vez.
    ///
    /// Uma falha aqui não é fatal: o cliente começa desconectado e a
    /// primeira leitura dispara a reconexão.
    pub fn connect(connector: C) -> Self {
        let mut client = Self::disconnected(connector);
        if let Err(e) = client.open() {
            warn!("Controlador indisponível na inicialização: {e}");
            client.connect_error = Some(e);
        }
        client
    }

    /// Cria o cliente sem tentar conectar.
    pub fn disconnected(connector: C) -> Self {
        Self {
            connector,
            conn: None,
            connect_error: None,
            reconnects: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Quantas reconexões foram tentadas desde a criação.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnects
    }

    fn open(&mut self) -> Result<(), ConnectionError> {
        let conn = self.connector.connect()?;
        self.conn = Some(conn);
        self.connect_error = None;
        Ok(())
    }

    /// Fecha a conexão atual e tenta uma única reconexão.
    fn recover(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
        self.reconnects += 1;
        match self.open() {
            Ok(()) => info!("Reconectado a {}", self.connector.target()),
            Err(e) => {
                debug!("Reconexão falhou: {e}");
                self.connect_error = Some(e);
            }
        }
    }

    /// Envia um comando e devolve a resposta como texto.
    fn exchange(&mut self, command: Command) -> Result<String, ClientError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(self
                .connect_error
                .take()
                .map_or(ClientError::NotConnected, ClientError::Connection));
        };
        let raw = conn.transact(&command.frame())?;
        Ok(protocol::response_text(&raw))
    }

    /// Executa `op`; em qualquer erro, aplica a política de reconexão.
    fn with_recovery<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let result = op(self);
        if let Err(e) = &result {
            warn!("Transação com {} falhou: {e}", self.connector.target());
            self.recover();
        }
        result
    }

    /// Identificação do controlador (`/00ID`).
    pub fn identify(&mut self) -> Result<String, ClientError> {
        self.with_recovery(|c| c.exchange(Command::Identify))
    }

    /// Relógio do controlador (`/00RC`).
    pub fn read_clock(&mut self) -> Result<String, ClientError> {
        self.with_recovery(|c| c.exchange(Command::ReadClock))
    }

    /// Lê e decodifica os 24 registradores float.
    pub fn read_all_floats(&mut self) -> Reading {
        let result = self.with_recovery(|c| {
            let text = c.exchange(Command::ReadAllFloats)?;
            Ok(protocol::decode_all_floats(&text)?)
        });
        match result {
            Ok(channels) => Reading::Sample(channels),
            Err(e) => Reading::Fault(e.fault_kind()),
        }
    }

    /// Igual a [`read_all_floats`](Self::read_all_floats), já convertido
    /// em vetor de 24 valores (NaN em falha).
    pub fn get_all_float(&mut self) -> Channels {
        self.read_all_floats().channels()
    }

    pub fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
    }
}

impl<C: Connector> ChannelSource for ControllerClient<C> {
    fn read(&mut self) -> Reading {
        self.read_all_floats()
    }

    fn close(&mut self) {
        ControllerClient::close(self);
    }
}
