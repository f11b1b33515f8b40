//! LIFO record of the hops a message has taken.

use std::fmt;

/// Identifier of one hop: the [`ConnectionId`](crate::session::ConnectionId)
/// a proxy received the message on.
pub type HopId = u64;

/// Ordered sequence of hop identifiers carried by a message.
///
/// Forwarding proxies [`push`](Self::push) the connection the message came
/// from; on the way back each proxy [`pop`](Self::pop)s one hop to learn where
/// to send the response next.
///
/// # Examples
///
/// ```
/// use peerwire::routing::RoutingStack;
///
/// let mut stack = RoutingStack::new();
/// stack.push(1);
/// stack.push(2);
/// assert!(stack.is_routable());
/// assert_eq!(stack.peek(), Some(2));
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// assert!(!stack.is_routable());
/// ```
#[derive(bincode::Encode, bincode::Decode, Clone, Default, PartialEq, Eq, Hash)]
pub struct RoutingStack {
    hops: Vec<HopId>,
}

impl RoutingStack {
    /// Create an empty stack.
    #[must_use]
    pub const fn new() -> Self { Self { hops: Vec::new() } }

    /// Record a hop.
    pub fn push(&mut self, hop: HopId) { self.hops.push(hop); }

    /// Remove and return the most recent hop.
    pub fn pop(&mut self) -> Option<HopId> { self.hops.pop() }

    /// Return the most recent hop without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<HopId> { self.hops.last().copied() }

    /// `true` while hops remain to be retraced.
    #[must_use]
    pub fn is_routable(&self) -> bool { !self.hops.is_empty() }

    /// Number of recorded hops.
    #[must_use]
    pub fn len(&self) -> usize { self.hops.len() }

    /// `true` when no hops are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.hops.is_empty() }

    /// Hops from oldest to most recent.
    #[must_use]
    pub fn as_slice(&self) -> &[HopId] { &self.hops }

    /// Drop every hop.
    pub fn clear(&mut self) { self.hops.clear(); }
}

impl fmt::Debug for RoutingStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.hops).finish()
    }
}

impl From<Vec<HopId>> for RoutingStack {
    fn from(hops: Vec<HopId>) -> Self { Self { hops } }
}

/// Messages that carry a [`RoutingStack`].
pub trait Routable {
    /// Borrow the routing stack.
    fn routing(&self) -> &RoutingStack;

    /// Mutably borrow the routing stack.
    fn routing_mut(&mut self) -> &mut RoutingStack;

    /// `true` while the message still has hops to retrace.
    fn is_routable(&self) -> bool { self.routing().is_routable() }

    /// Replace `other`'s routing stack with a copy of this one.
    ///
    /// Used when building a response so it inherits the request's path.
    fn export_routing_data_to<O: Routable + ?Sized>(&self, other: &mut O) {
        other.routing_mut().clone_from(self.routing());
    }
}

impl Routable for RoutingStack {
    fn routing(&self) -> &RoutingStack { self }

    fn routing_mut(&mut self) -> &mut RoutingStack { self }
}
