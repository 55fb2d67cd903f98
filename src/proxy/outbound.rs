use super::Target;
use crate::config::OutboundKind;
use std::io;
use tokio::net::TcpStream;

/// Opens the upstream leg. `None` means the outbound swallows the
/// connection (blackhole).
pub(crate) async fn dial(kind: OutboundKind, target: &Target) -> io::Result<Option<TcpStream>> {
    match kind {
        OutboundKind::Freedom => {
            let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
            stream.set_nodelay(true)?;
            Ok(Some(stream))
        }
        OutboundKind::Blackhole => Ok(None),
    }
}
