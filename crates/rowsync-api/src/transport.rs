// ── Transport seam ──
//
// The core engine only needs "open a channel for this filter and give me
// its frames". Reconnects, backoff and state live above this trait.

use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;

use crate::error::Error;
use crate::filter::TransportFilter;
use crate::wire::InboundFrame;

/// Frames from one physical connection, in delivery order.
///
/// The stream ends (`None`) when the connection closes cleanly and yields
/// `Err` on I/O failure. Either way the connection is finished.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<InboundFrame, Error>> + Send>>;

/// A realtime transport capable of opening one subscription channel.
pub trait Transport: Send + Sync + 'static {
    /// Open a connection, send the subscribe request for `filter`, and
    /// return the inbound frame stream. The subscription is not confirmed
    /// until an [`InboundFrame::Subscribed`] arrives on the stream.
    fn open(
        &self,
        filter: &TransportFilter,
    ) -> impl Future<Output = Result<FrameStream, Error>> + Send;
}
