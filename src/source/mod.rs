mod replay;

pub use replay::PcapReplay;
