//! Operation index: every `(method, path)` of a parsed document, addressable by tool name.
//!
//! A tool name matches an operation when it equals the operation's explicit `operationId` or
//! its generated identifier (lowercase method followed by the title-cased, non-parameter path
//! segments, e.g. `GET /users/{id}/orders` -> `getUsersOrders`).
//!
//! The index is built once and never mutated, so it can be shared freely across tasks.

use crate::error::{OpenApiToolsError, Result};
use crate::resolver::LocalResolver;
use openapiv3::{
    APIKeyLocation, OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathItem, ReferenceOr,
    RequestBody, Schema, SchemaKind, SecurityRequirement, SecurityScheme, Type,
};
use reqwest::Method;
use restbridge_http::response_shaping::ResponseShaping;
use rmcp::model::{JsonObject, Tool};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Vendor extension carrying a per-operation response shaping mode.
pub const RESPONSE_TRANSFORM_EXTENSION: &str = "x-response-transform";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl ParamLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
            Self::Body => "body",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRecord {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    /// Inferred primitive JSON type (`string`, `integer`, `object`, ...).
    pub schema_type: String,
    pub description: Option<String>,
}

/// How a request body is assembled from call arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// No request body declared.
    None,
    /// Object properties flattened into individual `body` parameters.
    Fields,
    /// A single `body` parameter holding the whole payload.
    Whole,
}

#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub method: Method,
    pub path: String,
    pub operation_id: Option<String>,
    pub generated_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub parameters: Vec<ParameterRecord>,
    pub body: BodyShape,
    /// Effective security requirements, in declaration order. Each entry lists scheme names.
    pub security: Vec<Vec<String>>,
    pub response_shaping: Option<ResponseShaping>,
}

impl OperationRecord {
    /// The name this operation is listed under.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        self.operation_id.as_deref().unwrap_or(&self.generated_id)
    }

    pub fn params_in(&self, location: ParamLocation) -> impl Iterator<Item = &ParameterRecord> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }

    /// The first scheme of the first security requirement, if any.
    #[must_use]
    pub fn primary_security_scheme(&self) -> Option<&str> {
        self.security
            .first()
            .and_then(|req| req.first())
            .map(String::as_str)
    }

    fn tool_description(&self) -> String {
        self.description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| self.summary.clone().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| format!("Calls {} {}", self.method, self.path))
    }

    fn input_schema(&self) -> JsonObject {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<Value> = Vec::new();
        for p in &self.parameters {
            let mut prop = json!({ "type": p.schema_type });
            if let Some(desc) = &p.description {
                prop["description"] = Value::String(desc.clone());
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }

        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        schema.insert("required".to_string(), Value::Array(required));
        schema
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyPlacement {
    Header,
    Query,
    Cookie,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecuritySchemeKind {
    ApiKey {
        name: String,
        placement: ApiKeyPlacement,
    },
    Bearer,
    Basic,
    OAuth2,
    /// Declared but not bindable (`openIdConnect`, `http` digest, ...).
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuritySchemeRecord {
    pub name: String,
    pub kind: SecuritySchemeKind,
}

/// Immutable lookup structure over all operations of a document.
#[derive(Debug, Clone)]
pub struct OperationIndex {
    operations: Vec<OperationRecord>,
    names: HashMap<String, usize>,
    base_url: Option<String>,
    schemes: HashMap<String, SecuritySchemeRecord>,
    title: Option<String>,
}

const METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

fn path_item_operation<'a>(item: &'a PathItem, method: &str) -> Option<&'a Operation> {
    match method {
        "get" => item.get.as_ref(),
        "put" => item.put.as_ref(),
        "post" => item.post.as_ref(),
        "delete" => item.delete.as_ref(),
        "options" => item.options.as_ref(),
        "head" => item.head.as_ref(),
        "patch" => item.patch.as_ref(),
        "trace" => item.trace.as_ref(),
        _ => None,
    }
}

impl OperationIndex {
    /// Build the index from a parsed document.
    ///
    /// Operations that cannot be converted (external refs, colliding parameter names) are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if two operations would answer to the same tool name.
    pub fn from_spec(spec: &OpenAPI) -> Result<Self> {
        let resolver = LocalResolver::new(spec)?;
        let global_security = spec.security.as_ref().map(|reqs| security_names(reqs));

        let mut operations = Vec::new();
        for (path, item) in &spec.paths.paths {
            let item = match resolver.path_item(item) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "skipping path");
                    continue;
                }
            };
            for method in METHODS {
                let Some(op) = path_item_operation(&item, method) else {
                    continue;
                };
                match build_record(&resolver, method, path, &item, op, global_security.as_ref()) {
                    Ok(record) => operations.push(record),
                    Err(e) => tracing::warn!(
                        method = %method.to_uppercase(),
                        path = %path,
                        error = %e,
                        "skipping operation"
                    ),
                }
            }
        }

        let names = build_name_table(&operations)?;

        let mut schemes = HashMap::new();
        if let Some(components) = &spec.components {
            for (name, scheme) in &components.security_schemes {
                match resolver.security_scheme(scheme) {
                    Ok(s) => {
                        schemes.insert(
                            name.clone(),
                            SecuritySchemeRecord {
                                name: name.clone(),
                                kind: scheme_kind(&s),
                            },
                        );
                    }
                    Err(e) => tracing::warn!(scheme = %name, error = %e, "skipping security scheme"),
                }
            }
        }

        let base_url = spec.servers.first().map(|server| {
            let mut url = server.url.clone();
            if let Some(vars) = &server.variables {
                for (name, var) in vars {
                    url = url.replace(&format!("{{{name}}}"), &var.default);
                }
            }
            url
        });

        tracing::debug!(
            operations = operations.len(),
            names = names.len(),
            "built operation index"
        );

        Ok(Self {
            operations,
            names,
            base_url,
            schemes,
            title: Some(spec.info.title.clone()).filter(|t| !t.is_empty()),
        })
    }

    /// Look up an operation by tool name.
    ///
    /// # Errors
    ///
    /// Returns [`OpenApiToolsError::ToolNotFound`] when nothing matches.
    pub fn resolve(&self, tool_name: &str) -> Result<&OperationRecord> {
        self.names
            .get(tool_name)
            .and_then(|&i| self.operations.get(i))
            .ok_or_else(|| OpenApiToolsError::ToolNotFound(tool_name.to_string()))
    }

    /// Tool descriptors for every operation, in document order.
    #[must_use]
    pub fn list(&self) -> Vec<Tool> {
        self.operations
            .iter()
            .map(|op| {
                Tool::new(
                    op.tool_name().to_string(),
                    op.tool_description(),
                    Arc::new(op.input_schema()),
                )
            })
            .collect()
    }

    /// The first declared server URL (server variables replaced by their defaults).
    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Replace the base URL (configuration override).
    #[must_use]
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        if base_url.is_some() {
            self.base_url = base_url;
        }
        self
    }

    #[must_use]
    pub fn security_scheme(&self, name: &str) -> Option<&SecuritySchemeRecord> {
        self.schemes.get(name)
    }

    #[must_use]
    pub fn operations(&self) -> &[OperationRecord] {
        &self.operations
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

/// Generated identifier: lowercase method, then every non-`{param}` path segment title-cased.
///
/// Segments are split on non-alphanumeric characters so the result is always a valid tool
/// name (`GET /current.json` -> `getCurrentJson`).
#[must_use]
pub fn generated_id(method: &str, path: &str) -> String {
    let mut id = method.to_ascii_lowercase();
    for segment in path.trim_start_matches('/').split('/') {
        if segment.starts_with('{') && segment.ends_with('}') {
            continue;
        }
        for piece in segment.split(|c: char| !c.is_ascii_alphanumeric()) {
            let mut chars = piece.chars();
            if let Some(first) = chars.next() {
                id.extend(first.to_uppercase());
                id.push_str(chars.as_str());
            }
        }
    }
    id
}

fn build_name_table(operations: &[OperationRecord]) -> Result<HashMap<String, usize>> {
    let describe = |i: usize| {
        let op = &operations[i];
        format!("{} {}", op.method, op.path)
    };

    let mut names: HashMap<String, usize> = HashMap::new();
    for (i, op) in operations.iter().enumerate() {
        let Some(id) = &op.operation_id else {
            continue;
        };
        if let Some(&prev) = names.get(id) {
            return Err(OpenApiToolsError::Config(format!(
                "operationId '{id}' is declared by both {} and {}",
                describe(prev),
                describe(i)
            )));
        }
        names.insert(id.clone(), i);
    }

    let mut by_generated: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, op) in operations.iter().enumerate() {
        by_generated.entry(op.generated_id.as_str()).or_default().push(i);
    }

    let mut generated: Vec<(&str, Vec<usize>)> = by_generated.into_iter().collect();
    generated.sort_by_key(|(_, owners)| owners[0]);

    for (gid, owners) in generated {
        if let Some(&explicit_owner) = names.get(gid) {
            if let Some(&other) = owners.iter().find(|&&i| i != explicit_owner) {
                return Err(OpenApiToolsError::Config(format!(
                    "operationId '{gid}' of {} collides with the generated name of {}; \
                     give the latter an explicit operationId",
                    describe(explicit_owner),
                    describe(other)
                )));
            }
            continue;
        }

        if let [only] = owners.as_slice() {
            names.insert(gid.to_string(), *only);
            continue;
        }

        let anonymous: Vec<usize> = owners
            .iter()
            .copied()
            .filter(|&i| operations[i].operation_id.is_none())
            .collect();
        match anonymous.as_slice() {
            [] => {
                tracing::debug!(name = %gid, "generated name shared by named operations; alias dropped");
            }
            [only] => {
                names.insert(gid.to_string(), *only);
            }
            [first, second, ..] => {
                return Err(OpenApiToolsError::Config(format!(
                    "{} and {} both generate the tool name '{gid}'; \
                     add an operationId to at least one of them",
                    describe(*first),
                    describe(*second)
                )));
            }
        }
    }

    Ok(names)
}

fn build_record(
    resolver: &LocalResolver,
    method: &str,
    path: &str,
    item: &PathItem,
    op: &Operation,
    global_security: Option<&Vec<Vec<String>>>,
) -> Result<OperationRecord> {
    let http_method = Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|e| OpenApiToolsError::OpenApi(format!("Unsupported HTTP method {method}: {e}")))?;

    let mut parameters = merge_parameters(resolver, &item.parameters, &op.parameters)?;

    let mut body = BodyShape::None;
    if let Some(body_ref) = &op.request_body {
        let request_body = resolver.request_body(body_ref)?;
        let (shape, body_params) = extract_body_params(resolver, &request_body)?;
        for bp in &body_params {
            if parameters.iter().any(|p| p.name == bp.name) {
                return Err(OpenApiToolsError::ParamCollision(format!(
                    "Body parameter '{}' collides with a path/query/header parameter in {} {}",
                    bp.name,
                    method.to_uppercase(),
                    path
                )));
            }
        }
        parameters.extend(body_params);
        body = shape;
    }

    let mut seen = HashSet::new();
    for p in &parameters {
        if !seen.insert(p.name.as_str()) {
            return Err(OpenApiToolsError::ParamCollision(format!(
                "Parameter '{}' appears in more than one location in {} {}",
                p.name,
                method.to_uppercase(),
                path
            )));
        }
    }

    let security = match &op.security {
        Some(reqs) => security_names(reqs),
        None => global_security.cloned().unwrap_or_default(),
    };

    let response_shaping = match op.extensions.get(RESPONSE_TRANSFORM_EXTENSION) {
        Some(v) => Some(serde_json::from_value::<ResponseShaping>(v.clone()).map_err(|e| {
            OpenApiToolsError::OpenApi(format!("Invalid {RESPONSE_TRANSFORM_EXTENSION}: {e}"))
        })?),
        None => None,
    };

    Ok(OperationRecord {
        method: http_method,
        path: path.to_string(),
        operation_id: op.operation_id.clone().filter(|id| !id.is_empty()),
        generated_id: generated_id(method, path),
        summary: op.summary.clone(),
        description: op.description.clone(),
        parameters,
        body,
        security,
        response_shaping,
    })
}

fn security_names(reqs: &[SecurityRequirement]) -> Vec<Vec<String>> {
    reqs.iter()
        .map(|req| req.keys().cloned().collect())
        .collect()
}

fn scheme_kind(scheme: &SecurityScheme) -> SecuritySchemeKind {
    match scheme {
        SecurityScheme::APIKey { location, name, .. } => SecuritySchemeKind::ApiKey {
            name: name.clone(),
            placement: match location {
                APIKeyLocation::Header => ApiKeyPlacement::Header,
                APIKeyLocation::Query => ApiKeyPlacement::Query,
                APIKeyLocation::Cookie => ApiKeyPlacement::Cookie,
            },
        },
        SecurityScheme::HTTP { scheme, .. } => match scheme.to_ascii_lowercase().as_str() {
            "bearer" => SecuritySchemeKind::Bearer,
            "basic" => SecuritySchemeKind::Basic,
            other => SecuritySchemeKind::Unsupported(format!("http/{other}")),
        },
        SecurityScheme::OAuth2 { .. } => SecuritySchemeKind::OAuth2,
        SecurityScheme::OpenIDConnect { .. } => {
            SecuritySchemeKind::Unsupported("openIdConnect".to_string())
        }
    }
}

/// Path-item parameters first, then operation parameters; the operation wins on the same
/// name and location.
fn merge_parameters(
    resolver: &LocalResolver,
    path_item_params: &[ReferenceOr<Parameter>],
    operation_params: &[ReferenceOr<Parameter>],
) -> Result<Vec<ParameterRecord>> {
    let mut merged: Vec<ParameterRecord> = Vec::new();
    for p in path_item_params.iter().chain(operation_params) {
        let record = extract_parameter(resolver, &resolver.parameter(p)?)?;
        if let Some(existing) = merged
            .iter_mut()
            .find(|m| m.name == record.name && m.location == record.location)
        {
            *existing = record;
        } else {
            merged.push(record);
        }
    }
    Ok(merged)
}

fn extract_parameter(resolver: &LocalResolver, param: &Parameter) -> Result<ParameterRecord> {
    let (data, location) = match param {
        Parameter::Path { parameter_data, .. } => (parameter_data, ParamLocation::Path),
        Parameter::Query { parameter_data, .. } => (parameter_data, ParamLocation::Query),
        Parameter::Header { parameter_data, .. } => (parameter_data, ParamLocation::Header),
        Parameter::Cookie { parameter_data, .. } => (parameter_data, ParamLocation::Cookie),
    };

    let (schema_type, schema_description) = match &data.format {
        ParameterSchemaOrContent::Schema(schema) => {
            let resolved = resolver.schema(schema)?;
            (schema_type(&resolved), resolved.schema_data.description.clone())
        }
        ParameterSchemaOrContent::Content(_) => ("string".to_string(), None),
    };

    Ok(ParameterRecord {
        name: data.name.clone(),
        location,
        // Path params are always required.
        required: location == ParamLocation::Path || data.required,
        schema_type,
        description: data.description.clone().or(schema_description),
    })
}

fn extract_body_params(
    resolver: &LocalResolver,
    body: &RequestBody,
) -> Result<(BodyShape, Vec<ParameterRecord>)> {
    let media = body
        .content
        .iter()
        .find(|(ct, _)| ct.to_ascii_lowercase().contains("json"))
        .or_else(|| body.content.first())
        .map(|(_, media)| media);
    let Some(schema_ref) = media.and_then(|m| m.schema.as_ref()) else {
        return Ok((BodyShape::None, Vec::new()));
    };
    let schema = resolver.schema(schema_ref)?;

    if let SchemaKind::Type(Type::Object(obj)) = &schema.schema_kind
        && !obj.properties.is_empty()
    {
        let mut params = Vec::with_capacity(obj.properties.len());
        for (prop_name, prop_schema) in &obj.properties {
            let (schema_type, description) = match resolver.boxed_schema(prop_schema) {
                Ok(s) => (schema_type(&s), s.schema_data.description.clone()),
                Err(_) => ("object".to_string(), None),
            };
            params.push(ParameterRecord {
                name: prop_name.clone(),
                location: ParamLocation::Body,
                required: body.required && obj.required.contains(prop_name),
                schema_type,
                description,
            });
        }
        return Ok((BodyShape::Fields, params));
    }

    Ok((
        BodyShape::Whole,
        vec![ParameterRecord {
            name: "body".to_string(),
            location: ParamLocation::Body,
            required: body.required,
            schema_type: schema_type(&schema),
            description: body
                .description
                .clone()
                .or_else(|| schema.schema_data.description.clone()),
        }],
    ))
}

fn schema_type(schema: &Schema) -> String {
    match &schema.schema_kind {
        SchemaKind::Type(t) => match t {
            Type::String(_) => "string",
            Type::Number(_) => "number",
            Type::Integer(_) => "integer",
            Type::Boolean(_) => "boolean",
            Type::Array(_) => "array",
            Type::Object(_) => "object",
        }
        .to_string(),
        SchemaKind::Any(any) => any.typ.clone().unwrap_or_else(|| "string".to_string()),
        _ => "object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(yaml: &str) -> Result<OperationIndex> {
        let spec: OpenAPI = serde_yaml::from_str(yaml).expect("spec");
        OperationIndex::from_spec(&spec)
    }

    const USERS: &str = r#"
openapi: "3.0.0"
info: { title: Users API, version: "1" }
servers:
  - url: "https://{env}.example.com/v1"
    variables:
      env: { default: api }
components:
  parameters:
    Limit:
      name: limit
      in: query
      required: true
      schema: { type: integer }
  schemas:
    NewUser:
      type: object
      required: [name]
      properties:
        name: { type: string, description: Display name }
        age: { type: integer }
  securitySchemes:
    ApiKeyAuth: { type: apiKey, in: header, name: X-API-Key }
security:
  - ApiKeyAuth: []
paths:
  /users:
    get:
      operationId: listUsers
      summary: List users
      parameters:
        - $ref: '#/components/parameters/Limit'
      responses: { "200": { description: ok } }
    post:
      requestBody:
        required: true
        content:
          application/json:
            schema: { $ref: '#/components/schemas/NewUser' }
      security: []
      responses: { "201": { description: created } }
  /users/{id}/orders:
    parameters:
      - name: id
        in: path
        required: true
        schema: { type: string }
    get:
      description: Orders of one user
      responses: { "200": { description: ok } }
"#;

    #[test]
    fn generated_ids_follow_method_and_static_segments() {
        assert_eq!(generated_id("GET", "/users/{id}/orders"), "getUsersOrders");
        assert_eq!(generated_id("post", "/users"), "postUsers");
        assert_eq!(generated_id("get", "/users/{id}"), "getUsers");
        assert_eq!(generated_id("get", "/current.json"), "getCurrentJson");
        assert_eq!(generated_id("delete", "/user-profiles/{id}/"), "deleteUserProfiles");
        assert_eq!(generated_id("get", "/"), "get");
    }

    #[test]
    fn resolves_by_explicit_and_generated_id() {
        let idx = index(USERS).expect("index");
        let by_explicit = idx.resolve("listUsers").expect("explicit");
        let by_generated = idx.resolve("getUsers").expect("generated");
        assert_eq!(by_explicit.path, by_generated.path);
        assert_eq!(by_explicit.method, Method::GET);

        let orders = idx.resolve("getUsersOrders").expect("orders");
        assert_eq!(orders.path, "/users/{id}/orders");
        assert!(orders.params_in(ParamLocation::Path).any(|p| p.name == "id" && p.required));

        assert!(matches!(
            idx.resolve("nope"),
            Err(OpenApiToolsError::ToolNotFound(_))
        ));
    }

    #[test]
    fn lists_descriptors_with_input_schema() {
        let idx = index(USERS).expect("index");
        let tools = idx.list();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec!["listUsers", "postUsers", "getUsersOrders"]);

        let list = &tools[0];
        assert_eq!(list.description.as_deref(), Some("List users"));
        let schema = Value::Object(list.input_schema.as_ref().clone());
        assert_eq!(schema["properties"]["limit"]["type"], "integer");
        assert_eq!(schema["required"], json!(["limit"]));

        let create = &tools[1];
        assert_eq!(create.description.as_deref(), Some("Calls POST /users"));
        let schema = Value::Object(create.input_schema.as_ref().clone());
        assert_eq!(schema["properties"]["name"]["description"], "Display name");
        assert_eq!(schema["required"], json!(["name"]));

        let orders = &tools[2];
        assert_eq!(orders.description.as_deref(), Some("Orders of one user"));
    }

    #[test]
    fn base_url_substitutes_server_variables() {
        let idx = index(USERS).expect("index");
        assert_eq!(idx.base_url(), Some("https://api.example.com/v1"));
        assert_eq!(idx.title(), Some("Users API"));
    }

    #[test]
    fn security_inherits_document_level_unless_overridden() {
        let idx = index(USERS).expect("index");
        let list = idx.resolve("listUsers").expect("list");
        assert_eq!(list.primary_security_scheme(), Some("ApiKeyAuth"));
        let create = idx.resolve("postUsers").expect("create");
        assert_eq!(create.primary_security_scheme(), None);
        assert_eq!(
            idx.security_scheme("ApiKeyAuth").map(|s| &s.kind),
            Some(&SecuritySchemeKind::ApiKey {
                name: "X-API-Key".to_string(),
                placement: ApiKeyPlacement::Header
            })
        );
    }

    #[test]
    fn non_object_body_becomes_single_parameter() {
        let idx = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /tags:
    put:
      requestBody:
        content:
          application/json:
            schema: { type: array, items: { type: string } }
      responses: { "200": { description: ok } }
"#,
        )
        .expect("index");
        let op = idx.resolve("putTags").expect("op");
        assert_eq!(op.body, BodyShape::Whole);
        let body: Vec<_> = op.params_in(ParamLocation::Body).collect();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0].name, "body");
        assert_eq!(body[0].schema_type, "array");
    }

    #[test]
    fn rejects_explicit_id_colliding_with_generated_id() {
        let err = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /things:
    get:
      responses: { "200": { description: ok } }
  /other:
    get:
      operationId: getThings
      responses: { "200": { description: ok } }
"#,
        )
        .expect_err("collision");
        assert!(matches!(err, OpenApiToolsError::Config(_)), "{err}");
    }

    #[test]
    fn rejects_anonymous_operations_sharing_a_generated_id() {
        let err = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /users:
    get:
      responses: { "200": { description: ok } }
  /users/{id}:
    get:
      parameters:
        - { name: id, in: path, required: true, schema: { type: string } }
      responses: { "200": { description: ok } }
"#,
        )
        .expect_err("collision");
        assert!(err.to_string().contains("getUsers"));
    }

    #[test]
    fn shared_generated_alias_goes_to_the_anonymous_operation() {
        let idx = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /users:
    get:
      operationId: listUsers
      responses: { "200": { description: ok } }
  /users/{id}:
    get:
      parameters:
        - { name: id, in: path, required: true, schema: { type: string } }
      responses: { "200": { description: ok } }
"#,
        )
        .expect("index");
        assert_eq!(idx.resolve("getUsers").expect("alias").path, "/users/{id}");
        assert_eq!(idx.resolve("listUsers").expect("explicit").path, "/users");
    }

    #[test]
    fn named_operation_keeps_its_unshared_generated_alias() {
        let idx = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /items/{id}:
    delete:
      operationId: removeItem
      parameters:
        - { name: id, in: path, required: true, schema: { type: string } }
      responses: { "204": { description: gone } }
"#,
        )
        .expect("index");
        let by_alias = idx.resolve("deleteItems").expect("alias");
        assert_eq!(by_alias.path, "/items/{id}");
        assert_eq!(by_alias.method, Method::DELETE);
        assert_eq!(idx.resolve("removeItem").expect("explicit").path, "/items/{id}");
    }

    #[test]
    fn alias_shared_by_named_operations_is_dropped() {
        let idx = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /users:
    get:
      operationId: listUsers
      responses: { "200": { description: ok } }
  /users/{id}:
    get:
      operationId: showUser
      parameters:
        - { name: id, in: path, required: true, schema: { type: string } }
      responses: { "200": { description: ok } }
"#,
        )
        .expect("index");
        assert!(matches!(
            idx.resolve("getUsers"),
            Err(OpenApiToolsError::ToolNotFound(_))
        ));
        assert_eq!(idx.resolve("showUser").expect("explicit").path, "/users/{id}");
    }

    #[test]
    fn skips_operations_with_external_refs() {
        let idx = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /a:
    get:
      parameters:
        - $ref: './common.yaml#/components/parameters/Q'
      responses: { "200": { description: ok } }
  /b:
    get:
      responses: { "200": { description: ok } }
"#,
        )
        .expect("index");
        assert!(idx.resolve("getA").is_err());
        assert!(idx.resolve("getB").is_ok());
    }

    #[test]
    fn reads_response_transform_extension() {
        let idx = index(
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /weather:
    get:
      x-response-transform: { mode: query, expression: ".main" }
      responses: { "200": { description: ok } }
"#,
        )
        .expect("index");
        assert_eq!(
            idx.resolve("getWeather").expect("op").response_shaping,
            Some(ResponseShaping::Query {
                expression: ".main".to_string()
            })
        );
    }
}
