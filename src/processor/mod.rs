pub mod feature_processor;
mod engine;
mod publisher;
mod flow;
mod reconstructor;
mod scanner;
mod table;

pub use feature_processor::FeatureProcessor;
pub use flow::{
    DirectionFilter, FlowDirection, FlowKey, FlowRecord, PacketRecord, Protocol, TcpFlag, TcpFlags,
};
pub use publisher::{ChannelSink, LogSink, ScanEvent, ScanSink};
pub use reconstructor::{FlowReconstructor, IngestStats, LinkLayer, RawFrame};
pub use scanner::Scanner;
pub use table::FlowTable;
