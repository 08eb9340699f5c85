pub mod methods;
pub mod rpc;

pub use rpc::{
    parse_request, RpcError, RpcId, RpcNotification, RpcRequest, RpcResponse, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
