//! Build outbound HTTP requests from an operation record and call arguments.
//!
//! Pure: nothing here performs I/O. Credentials are bound afterwards by [`crate::auth`].

use crate::error::{OpenApiToolsError, Result};
use crate::index::{BodyShape, OperationRecord, ParamLocation};
use restbridge_http::client::HttpRequest;
use serde_json::{Map, Value};
use url::Url;

/// Assemble the request for `op` against `base_url`.
///
/// - `{name}` path placeholders are substituted with percent-encoded argument values
/// - query parameters are appended for every method; arrays become repeated keys
/// - header and cookie parameters become headers
/// - a JSON body is attached only for `POST`, `PUT` and `PATCH`
///
/// Arguments that are absent or `null` count as missing.
///
/// # Errors
///
/// Returns an error if a required parameter is missing, the base URL is absent or invalid,
/// or a header value is not representable.
pub fn build_request(
    op: &OperationRecord,
    base_url: Option<&str>,
    args: &Map<String, Value>,
) -> Result<HttpRequest> {
    let base = base_url
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or(OpenApiToolsError::MissingBaseUrl)?;

    let mut path = op.path.clone();
    for p in op.params_in(ParamLocation::Path) {
        let value = present(args, &p.name).ok_or_else(|| missing(&p.name, p.location))?;
        path = path.replace(
            &format!("{{{}}}", p.name),
            &encode_path_component(&value_to_string(value)),
        );
    }
    if let Some(start) = path.find('{')
        && let Some(len) = path[start..].find('}')
    {
        return Err(missing(&path[start + 1..start + len], ParamLocation::Path));
    }

    let url_str = format!("{}{}", base.trim_end_matches('/'), path);
    let url = Url::parse(&url_str)
        .map_err(|e| OpenApiToolsError::InvalidUrl(format!("{url_str}: {e}")))?;
    let mut request = HttpRequest::new(op.method.clone(), url);

    for p in op.params_in(ParamLocation::Query) {
        match present(args, &p.name) {
            Some(Value::Array(items)) => {
                for item in items.iter().filter(|v| !v.is_null()) {
                    request.append_query_pair(&p.name, &value_to_string(item));
                }
            }
            Some(value) => request.append_query_pair(&p.name, &value_to_string(value)),
            None if p.required => return Err(missing(&p.name, p.location)),
            None => {}
        }
    }

    for p in op.params_in(ParamLocation::Header) {
        match present(args, &p.name) {
            Some(value) => request.set_header(&p.name, &value_to_string(value))?,
            None if p.required => return Err(missing(&p.name, p.location)),
            None => {}
        }
    }

    let mut cookies = Vec::new();
    for p in op.params_in(ParamLocation::Cookie) {
        match present(args, &p.name) {
            Some(value) => cookies.push(format!("{}={}", p.name, value_to_string(value))),
            None if p.required => return Err(missing(&p.name, p.location)),
            None => {}
        }
    }
    if !cookies.is_empty() {
        request.set_header("cookie", &cookies.join("; "))?;
    }

    if carries_body(&op.method)
        && let Some(body) = build_body(op, args)?
    {
        request.body = Some(serde_json::to_vec(&body)?);
        request.set_header("content-type", "application/json")?;
    }

    Ok(request)
}

fn build_body(op: &OperationRecord, args: &Map<String, Value>) -> Result<Option<Value>> {
    match op.body {
        BodyShape::Whole => {
            let Some(p) = op.params_in(ParamLocation::Body).next() else {
                return Ok(None);
            };
            match present(args, &p.name) {
                Some(value) => Ok(Some(value.clone())),
                None if p.required => Err(missing(&p.name, p.location)),
                None => Ok(None),
            }
        }
        BodyShape::Fields => {
            let mut body = Map::new();
            for p in op.params_in(ParamLocation::Body) {
                match present(args, &p.name) {
                    Some(value) => {
                        body.insert(p.name.clone(), value.clone());
                    }
                    None if p.required => return Err(missing(&p.name, p.location)),
                    None => {}
                }
            }
            Ok((!body.is_empty()).then_some(Value::Object(body)))
        }
        // Nothing declared: the whole argument map goes out as-is.
        BodyShape::None => Ok((!args.is_empty()).then(|| Value::Object(args.clone()))),
    }
}

fn carries_body(method: &reqwest::Method) -> bool {
    matches!(method.as_str(), "POST" | "PUT" | "PATCH")
}

fn present<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    args.get(name).filter(|v| !v.is_null())
}

fn missing(name: &str, location: ParamLocation) -> OpenApiToolsError {
    OpenApiToolsError::MissingParameter {
        name: name.to_string(),
        location: location.as_str().to_string(),
    }
}

fn encode_path_component(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if is_unreserved(b) {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn is_unreserved(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

/// Scalars render bare; objects and arrays render as compact JSON.
pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}
