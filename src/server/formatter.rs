use anyhow::Error;
use hyper::header;
use hyper::{Body, Response, StatusCode};
use serde_json::Value;

use convoy_api_types::ErrorResponse;

const JSON_CONTENT_TYPE: &str = "application/json";
const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.1+json";

/// Error message of a failed request, picked up by the response logger.
pub(crate) struct ErrorMessageExtension(pub String);

/// Responses carrying this are never logged.
pub(crate) struct NoLogExtension();

/// Encode a handler result. `null` results are sent as empty body.
pub(crate) fn json_data_response(data: Value, plugin: bool) -> Result<Response<Body>, Error> {
    let content_type = if plugin { PLUGIN_CONTENT_TYPE } else { JSON_CONTENT_TYPE };
    let body = match data {
        Value::Null => Body::empty(),
        data => Body::from(serde_json::to_vec(&data)?),
    };
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)?)
}

pub(crate) fn json_error_response(code: StatusCode, message: String) -> Result<Response<Body>, Error> {
    let body = serde_json::to_vec(&ErrorResponse {
        error: message.clone(),
    })?;
    Ok(Response::builder()
        .status(code)
        .header(header::CONTENT_TYPE, JSON_CONTENT_TYPE)
        .extension(ErrorMessageExtension(message))
        .body(body.into())?)
}
