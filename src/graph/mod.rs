pub mod document;
pub mod execution_graph;
pub mod model;

pub use document::FlowDocument;
pub use execution_graph::ExecutionGraph;
pub use model::{
    Connection, FlowGraph, Node, NodeData, NodeId, Socket, SocketDirection, SocketId,
};
