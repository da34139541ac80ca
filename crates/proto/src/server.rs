use crate::{
  controller::Controller, node::Node, proto, ControllerService, Identity, IdentityService,
  NodeService,
};
use futures::{Stream, TryStreamExt};
use std::{
  fmt, io,
  net::SocketAddr,
  path::PathBuf,
  pin::Pin,
  str::FromStr,
  sync::Arc,
  task::{Context, Poll},
};
use thiserror::Error;
use tokio::{
  io::{AsyncRead, AsyncWrite, ReadBuf},
  net::{TcpListener, TcpStream, UnixListener, UnixStream},
};
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::{server::Connected, Server};
use tracing::{debug, info};

/// Where the gRPC server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  Unix(PathBuf),
  Tcp(SocketAddr),
}

#[derive(Debug, Error)]
pub enum ServeError {
  #[error("invalid endpoint {0:?}: expected unix:/path or tcp://host:port")]
  InvalidEndpoint(String),

  #[error("failed to bind {endpoint}")]
  Bind {
    endpoint: Endpoint,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Transport(#[from] tonic::transport::Error),
}

impl FromStr for Endpoint {
  type Err = ServeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if let Some(rest) = s.strip_prefix("unix:") {
      let path = rest.strip_prefix("//").unwrap_or(rest);
      if path.is_empty() {
        return Err(ServeError::InvalidEndpoint(s.into()));
      }

      return Ok(Endpoint::Unix(PathBuf::from(path)));
    }

    if let Some(rest) = s.strip_prefix("tcp://") {
      return rest
        .parse()
        .map(Endpoint::Tcp)
        .map_err(|_| ServeError::InvalidEndpoint(s.into()));
    }

    Err(ServeError::InvalidEndpoint(s.into()))
  }
}

impl fmt::Display for Endpoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
      Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
    }
  }
}

/// An accepted connection on either kind of [Endpoint].
#[derive(Debug)]
pub enum Conn {
  Unix(UnixStream),
  Tcp(TcpStream),
}

impl Connected for Conn {
  fn remote_addr(&self) -> Option<SocketAddr> {
    match self {
      Conn::Unix(_) => None,
      Conn::Tcp(s) => s.peer_addr().ok(),
    }
  }
}

impl AsyncRead for Conn {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    match self.get_mut() {
      Conn::Unix(s) => Pin::new(s).poll_read(cx, buf),
      Conn::Tcp(s) => Pin::new(s).poll_read(cx, buf),
    }
  }
}

impl AsyncWrite for Conn {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    match self.get_mut() {
      Conn::Unix(s) => Pin::new(s).poll_write(cx, buf),
      Conn::Tcp(s) => Pin::new(s).poll_write(cx, buf),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      Conn::Unix(s) => Pin::new(s).poll_flush(cx),
      Conn::Tcp(s) => Pin::new(s).poll_flush(cx),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      Conn::Unix(s) => Pin::new(s).poll_shutdown(cx),
      Conn::Tcp(s) => Pin::new(s).poll_shutdown(cx),
    }
  }
}

type Incoming = Pin<Box<dyn Stream<Item = io::Result<Conn>> + Send>>;

async fn bind(endpoint: &Endpoint) -> io::Result<Incoming> {
  match endpoint {
    Endpoint::Unix(path) => {
      match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
        Err(e) => return Err(e),
      }

      if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
      }

      let listener = UnixListener::bind(path)?;
      Ok(Box::pin(UnixListenerStream::new(listener).map_ok(Conn::Unix)))
    }

    Endpoint::Tcp(addr) => {
      let listener = TcpListener::bind(addr).await?;
      Ok(Box::pin(TcpListenerStream::new(listener).map_ok(Conn::Tcp)))
    }
  }
}

/// Serve the identity service, plus whichever of the controller and node
/// services are given, until `shutdown` resolves.
pub async fn serve<I, C, N, F>(
  endpoint: Endpoint,
  identity: Arc<I>,
  controller: Option<Arc<C>>,
  node: Option<Arc<N>>,
  shutdown: F,
) -> Result<(), ServeError>
where
  I: IdentityService,
  C: ControllerService,
  N: NodeService,
  F: std::future::Future<Output = ()>,
{
  use proto::{
    controller_server::ControllerServer, identity_server::IdentityServer, node_server::NodeServer,
  };

  let incoming = bind(&endpoint).await.map_err(|source| ServeError::Bind {
    endpoint: endpoint.clone(),
    source,
  })?;

  info!(
    %endpoint,
    controller = controller.is_some(),
    node = node.is_some(),
    "listening"
  );

  let identity = IdentityServer::new(Identity::new(identity));
  let mut builder = Server::builder();
  match (controller, node) {
    (Some(controller), Some(node)) => {
      builder
        .add_service(identity)
        .add_service(ControllerServer::new(Controller::new(controller)))
        .add_service(NodeServer::new(Node::new(node)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?
    }
    (Some(controller), None) => {
      builder
        .add_service(identity)
        .add_service(ControllerServer::new(Controller::new(controller)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?
    }
    (None, Some(node)) => {
      builder
        .add_service(identity)
        .add_service(NodeServer::new(Node::new(node)))
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?
    }
    (None, None) => {
      builder
        .add_service(identity)
        .serve_with_incoming_shutdown(incoming, shutdown)
        .await?
    }
  }

  if let Endpoint::Unix(path) = &endpoint {
    let _ = tokio::fs::remove_file(path).await;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case("unix:/tmp/csi.sock" => Some(Endpoint::Unix("/tmp/csi.sock".into())) ; "unix short")]
  #[test_case("unix:///tmp/csi.sock" => Some(Endpoint::Unix("/tmp/csi.sock".into())) ; "unix url")]
  #[test_case("tcp://127.0.0.1:10000" => Some(Endpoint::Tcp(([127, 0, 0, 1], 10000).into())) ; "tcp")]
  #[test_case("unix:" => None ; "empty unix path")]
  #[test_case("tcp://localhost" => None ; "tcp without port")]
  #[test_case("/tmp/csi.sock" => None ; "no scheme")]
  fn parse_endpoint(s: &str) -> Option<Endpoint> {
    s.parse().ok()
  }

  #[test]
  fn display_round_trips() {
    let endpoint = Endpoint::Unix("/var/lib/csi/csi.sock".into());
    assert_eq!(endpoint.to_string().parse::<Endpoint>().ok(), Some(endpoint));
  }

  #[tokio::test]
  async fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("csi.sock");
    std::fs::write(&path, b"").unwrap();

    let endpoint = Endpoint::Unix(path.clone());
    let incoming = bind(&endpoint).await;

    assert!(incoming.is_ok());
    assert!(path.exists());
  }
}
