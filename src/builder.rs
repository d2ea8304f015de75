//! Reply body assembly with nested structures and arrays.
//!
//! A handler may keep adding to a structure after adding more values to the
//! reply, so nested values cannot be written into one contiguous buffer as
//! they arrive. Instead every open structure or array gets its own
//! [`PacketBuf`] and remembers the *splice offset*: the length of its
//! parent's buffer when it was opened. At send time the tree is walked in
//! creation order and emitted as a list of borrowed chunks, so the final
//! body is never copied into one buffer.
//!
//! ```text
//! root:  [int][struct-start]|[struct-end][str]
//!                           ^ offset of child 0
//! child:                    [avp][int][avp][array-start]|[array-end]
//!                                                       ^ offset of grandchild
//! ```

use std::io::IoSlice;

use crate::{
    error::{BinRpcError, SendError},
    packet::PacketBuf,
    transport::Transport,
};

/// Opaque reference to an open structure or array of one reply.
///
/// Handles are only meaningful for the reply that created them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

/// Kind of container a builder node represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Named members.
    Struct,
    /// Positional elements.
    Array,
}

impl NodeKind {
    /// Human readable name used in log lines and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Struct => "structure",
            Self::Array => "array",
        }
    }
}

#[derive(Debug)]
struct Node {
    kind: NodeKind,
    buf: PacketBuf,
    offset: usize,
    children: Vec<usize>,
}

/// The reply body of one request: a root buffer plus the tree of nested
/// containers spliced into it.
#[derive(Debug)]
pub struct ReplyBody {
    root: PacketBuf,
    children: Vec<usize>,
    nodes: Vec<Node>,
    node_capacity: usize,
}

impl ReplyBody {
    /// Create an empty body. The root buffer holds `body_capacity` bytes and
    /// every nested container `node_capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] if a capacity cannot hold a record.
    pub fn new(body_capacity: usize, node_capacity: usize) -> Result<Self, BinRpcError> {
        // validate the node capacity up front rather than on first open
        PacketBuf::with_capacity(node_capacity)?;
        Ok(Self {
            root: PacketBuf::with_capacity(body_capacity)?,
            children: Vec::new(),
            nodes: Vec::new(),
            node_capacity,
        })
    }

    /// The root buffer that top level values are appended to.
    pub fn root_mut(&mut self) -> &mut PacketBuf { &mut self.root }

    /// Bytes written to the root buffer, excluding nested containers.
    #[must_use]
    pub fn root_len(&self) -> usize { self.root.len() }

    /// Kind of the container behind `handle`.
    #[must_use]
    pub fn kind(&self, handle: NodeHandle) -> Option<NodeKind> {
        self.nodes.get(handle.0).map(|node| node.kind)
    }

    /// Buffer of the container behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Invalid`] for a handle of another reply.
    pub fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut PacketBuf, BinRpcError> {
        self.nodes
            .get_mut(handle.0)
            .map(|node| &mut node.buf)
            .ok_or(BinRpcError::Invalid)
    }

    /// Open a nested container inside `parent` (the root when `None`).
    ///
    /// When `name` is given the container becomes a structure member. The
    /// start and end tags are written to the parent right away; the new
    /// node's contents are spliced between them when the body is sent.
    ///
    /// # Errors
    ///
    /// Returns [`BinRpcError::Overflow`] when the parent buffer is full and
    /// [`BinRpcError::Invalid`] for an unknown parent handle. The parent is
    /// left unchanged on error.
    pub fn open(
        &mut self,
        parent: Option<NodeHandle>,
        name: Option<&[u8]>,
        kind: NodeKind,
    ) -> Result<NodeHandle, BinRpcError> {
        let node_buf = PacketBuf::with_capacity(self.node_capacity)?;
        let buf = match parent {
            Some(handle) => self.node_mut(handle)?,
            None => &mut self.root,
        };
        let mark = buf.len();
        let offset = match open_tags(buf, name, kind) {
            Ok(offset) => offset,
            Err(err) => {
                buf.truncate(mark);
                return Err(err);
            }
        };
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            buf: node_buf,
            offset,
            children: Vec::new(),
        });
        match parent {
            Some(handle) => self.nodes[handle.0].children.push(id),
            None => self.children.push(id),
        }
        Ok(NodeHandle(id))
    }

    /// Total body length: every buffer in the tree.
    #[must_use]
    pub fn len(&self) -> usize { self.root.len() + self.subtree_len(&self.children) }

    /// Returns true if nothing was added.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn subtree_len(&self, children: &[usize]) -> usize {
        children
            .iter()
            .map(|&id| {
                let node = &self.nodes[id];
                node.buf.len() + self.subtree_len(&node.children)
            })
            .sum()
    }

    /// Emit the body as chunks in wire order.
    ///
    /// # Errors
    ///
    /// Propagates transport errors from intermediate flushes.
    pub fn write_chunks<'a>(&'a self, out: &mut ChunkWriter<'a, '_>) -> Result<(), SendError> {
        self.fill(self.root.as_slice(), &self.children, out)
    }

    fn fill<'a>(
        &'a self,
        buf: &'a [u8],
        children: &[usize],
        out: &mut ChunkWriter<'a, '_>,
    ) -> Result<(), SendError> {
        let mut pos = 0;
        for &id in children {
            let node = &self.nodes[id];
            out.push(&buf[pos..node.offset])?;
            pos = node.offset;
            self.fill(node.buf.as_slice(), &node.children, out)?;
        }
        out.push(&buf[pos..])
    }

    /// Copy the body into one contiguous buffer by splicing each node into
    /// its parent at its offset.
    #[must_use]
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.flatten_into(self.root.as_slice(), &self.children, &mut out);
        out
    }

    fn flatten_into(&self, buf: &[u8], children: &[usize], out: &mut Vec<u8>) {
        let mut pos = 0;
        for &id in children {
            let node = &self.nodes[id];
            out.extend_from_slice(&buf[pos..node.offset]);
            pos = node.offset;
            self.flatten_into(node.buf.as_slice(), &node.children, out);
        }
        out.extend_from_slice(&buf[pos..]);
    }
}

fn open_tags(
    buf: &mut PacketBuf,
    name: Option<&[u8]>,
    kind: NodeKind,
) -> Result<usize, BinRpcError> {
    if let Some(name) = name {
        buf.add_avp_name(name)?;
    }
    match kind {
        NodeKind::Struct => buf.start_struct()?,
        NodeKind::Array => buf.start_array()?,
    }
    let offset = buf.len();
    match kind {
        NodeKind::Struct => buf.end_struct()?,
        NodeKind::Array => buf.end_array()?,
    }
    Ok(offset)
}

/// Bounded list of chunks for one scatter-gather write.
///
/// When the list is full the collected chunks are written out before the
/// next one is accepted, so arbitrarily large trees never need more than
/// `budget` chunks at once. Empty chunks are skipped.
pub struct ChunkWriter<'a, 't> {
    chunks: Vec<IoSlice<'a>>,
    budget: usize,
    transport: &'t mut dyn Transport,
    flushes: usize,
}

impl<'a, 't> ChunkWriter<'a, 't> {
    /// Create a writer holding at most `budget` chunks (at least one).
    pub fn new(transport: &'t mut dyn Transport, budget: usize) -> Self {
        let budget = budget.max(1);
        Self {
            chunks: Vec::with_capacity(budget),
            budget,
            transport,
            flushes: 0,
        }
    }

    /// Queue `chunk`, flushing first if the list is full.
    ///
    /// # Errors
    ///
    /// Propagates the transport error of the flush.
    pub fn push(&mut self, chunk: &'a [u8]) -> Result<(), SendError> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.chunks.len() >= self.budget {
            self.flush()?;
        }
        self.chunks.push(IoSlice::new(chunk));
        Ok(())
    }

    /// Number of writes issued so far.
    #[must_use]
    pub const fn flushes(&self) -> usize { self.flushes }

    fn flush(&mut self) -> Result<(), SendError> {
        if self.chunks.is_empty() {
            return Ok(());
        }
        self.transport.send_vectored(&self.chunks)?;
        self.chunks.clear();
        self.flushes += 1;
        Ok(())
    }

    /// Write any remaining chunks and return the number of writes issued.
    ///
    /// # Errors
    ///
    /// Propagates the transport error.
    pub fn finish(mut self) -> Result<usize, SendError> {
        self.flush()?;
        Ok(self.flushes)
    }
}
