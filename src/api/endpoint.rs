pub type Endpoint = str;

pub const REALTIME_INFO: &Endpoint = "/getRealtimeInfo.do";
