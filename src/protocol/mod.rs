mod frame;
mod msg;
mod sender;

pub use frame::{encode_job_frame, Frame, FrameCodec, EXIT};
pub use msg::{JobPayload, Response, ResponseData, ResponseHeader, JOB_TAG};
pub use sender::ResponseSender;
