use crate::record::NodeId;
use crate::semantics::UpdateArgs;
use crate::semantics::UpdateOperation;
use crate::semantics::ValuesMap;
use bytes::Bytes;
use prost::Message;
use std::collections::BTreeSet;
use std::fmt;

/// RequestId identifies a client request across retries and re-proposals: the node that first
/// proposed it plus that node's per-instance sequence number.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestId {
    pub origin: NodeId,
    pub seq_no: u64,
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.origin.as_u32(), self.seq_no)
    }
}

/// What a decided slot asks the state machine to do.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum RequestBody {
    Update {
        field: String,
        operation: UpdateOperation,
        args: UpdateArgs,
    },
    /// Ends the epoch. Nothing decided after it is executed.
    Stop { next_members: BTreeSet<NodeId> },
    /// Removes the record and retires the group.
    Delete,
    /// Fills a hole left by a coordinator that failed mid-proposal.
    NoOp,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Request {
    pub(crate) id: RequestId,
    pub(crate) body: RequestBody,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum CodecError {
    #[error("Malformed payload: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Payload carries no request body")]
    MissingBody,
    #[error("Unknown operation code {0}")]
    UnknownOperation(u32),
    #[error("Payload is missing field {0}")]
    MissingField(&'static str),
}

impl Request {
    pub(crate) fn encode(&self) -> Bytes {
        let body = match &self.body {
            RequestBody::Update { field, operation, args } => proto_request::Body::Update(ProtoUpdate {
                field: field.clone(),
                operation: operation.code(),
                new_values: args.new_values.clone(),
                old_values: args.old_values.clone(),
                argument: args.argument as u64,
                user_json: values_map_to_proto(&args.user_json),
            }),
            RequestBody::Stop { next_members } => proto_request::Body::Stop(ProtoStop {
                next_members: next_members.iter().map(NodeId::as_u32).collect(),
            }),
            RequestBody::Delete => proto_request::Body::Delete(ProtoDelete {}),
            RequestBody::NoOp => proto_request::Body::NoOp(ProtoNoOp {}),
        };

        encode_message(&ProtoRequest {
            origin: self.id.origin.as_u32(),
            seq_no: self.id.seq_no,
            body: Some(body),
        })
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Request, CodecError> {
        let proto = ProtoRequest::decode(payload)?;
        let body = match proto.body.ok_or(CodecError::MissingBody)? {
            proto_request::Body::Update(update) => RequestBody::Update {
                operation: UpdateOperation::from_code(update.operation)
                    .ok_or(CodecError::UnknownOperation(update.operation))?,
                field: update.field,
                args: UpdateArgs {
                    new_values: update.new_values,
                    old_values: update.old_values,
                    argument: update.argument as usize,
                    user_json: values_map_from_proto(update.user_json),
                },
            },
            proto_request::Body::Stop(stop) => RequestBody::Stop {
                next_members: stop.next_members.into_iter().map(NodeId).collect(),
            },
            proto_request::Body::Delete(_) => RequestBody::Delete,
            proto_request::Body::NoOp(_) => RequestBody::NoOp,
        };

        Ok(Request {
            id: RequestId {
                origin: NodeId(proto.origin),
                seq_no: proto.seq_no,
            },
            body,
        })
    }
}

pub(crate) fn encode_message<M: Message>(message: &M) -> Bytes {
    let mut buf = Vec::with_capacity(message.encoded_len());
    message
        .encode(&mut buf)
        .expect("Encoding into a Vec can't run out of capacity");
    Bytes::from(buf)
}

pub(crate) fn values_map_to_proto(values: &ValuesMap) -> Vec<ProtoField> {
    values
        .iter()
        .map(|(name, values)| ProtoField {
            name: name.clone(),
            values: values.clone(),
        })
        .collect()
}

pub(crate) fn values_map_from_proto(fields: Vec<ProtoField>) -> ValuesMap {
    fields.into_iter().map(|f| (f.name, f.values)).collect()
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoRequest {
    #[prost(uint32, tag = "1")]
    pub origin: u32,
    #[prost(uint64, tag = "2")]
    pub seq_no: u64,
    #[prost(oneof = "proto_request::Body", tags = "3, 4, 5, 6")]
    pub body: Option<proto_request::Body>,
}

pub(crate) mod proto_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "3")]
        Update(super::ProtoUpdate),
        #[prost(message, tag = "4")]
        Stop(super::ProtoStop),
        #[prost(message, tag = "5")]
        Delete(super::ProtoDelete),
        #[prost(message, tag = "6")]
        NoOp(super::ProtoNoOp),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoUpdate {
    #[prost(string, tag = "1")]
    pub field: String,
    #[prost(uint32, tag = "2")]
    pub operation: u32,
    #[prost(string, repeated, tag = "3")]
    pub new_values: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    pub old_values: Vec<String>,
    #[prost(uint64, tag = "5")]
    pub argument: u64,
    #[prost(message, repeated, tag = "6")]
    pub user_json: Vec<ProtoField>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoField {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoStop {
    #[prost(uint32, repeated, tag = "1")]
    pub next_members: Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoDelete {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub(crate) struct ProtoNoOp {}
