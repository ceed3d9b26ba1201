//! ICAP wire parsing: the request reader, the `Encapsulated` directive, and
//! the embedded HTTP head codec.

mod http_embed;
mod icap;

pub(crate) use http_embed::{
    parse_request_head, parse_response_head, serialize_request_head, serialize_response_head,
};
pub(crate) use icap::{canon_header, read_request};
