use bytes::{Buf, BufMut, Bytes, BytesMut};
use catalog::{Product, ProductDraft, ProductId, ProductsList};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

// Command type identifiers
pub const CMD_PING: u8 = 0x00;
pub const CMD_CREATE_PRODUCT: u8 = 0x01;
pub const CMD_UPDATE_PRODUCT: u8 = 0x02;
pub const CMD_GET_PRODUCT: u8 = 0x03;
pub const CMD_SEARCH_PRODUCTS: u8 = 0x04;

// Response type identifiers
pub const RESP_PONG: u8 = 0x00;
pub const RESP_PRODUCT: u8 = 0x01;
pub const RESP_PRODUCTS: u8 = 0x02;
pub const RESP_NOT_FOUND: u8 = 0x03;
pub const RESP_INVALID: u8 = 0x04;
pub const RESP_ERROR: u8 = 0x05;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Ping,
    CreateProduct { product: ProductDraft },
    UpdateProduct { id: ProductId, product: ProductDraft },
    GetProductById { id: ProductId },
    SearchProducts { query: String, page: Option<u32>, size: Option<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pong,
    Product { product: Product },
    Products { list: ProductsList },
    NotFound { id: String },
    Invalid { msg: String },
    Error { msg: String },
}

#[derive(Serialize, Deserialize)]
struct UpdatePayload {
    id: ProductId,
    product: ProductDraft,
}

#[derive(Serialize, Deserialize)]
struct SearchPayload {
    #[serde(default)]
    query: String,
    page: Option<u32>,
    size: Option<u32>,
}

impl Request {
    /// Encode a Request into Bytes for transmission
    ///
    /// Format:
    /// - PING: [0x00]
    /// - CREATE_PRODUCT: [0x01][len: u32][draft JSON]
    /// - UPDATE_PRODUCT: [0x02][len: u32][{"id", "product"} JSON]
    /// - GET_PRODUCT: [0x03][len: u32][id UTF-8]
    /// - SEARCH_PRODUCTS: [0x04][len: u32][{"query", "page", "size"} JSON]
    pub fn encode(&self) -> Result<Bytes, String> {
        let mut buf = BytesMut::new();

        match self {
            Request::Ping => {
                buf.put_u8(CMD_PING);
            }
            Request::CreateProduct { product } => {
                buf.put_u8(CMD_CREATE_PRODUCT);
                put_json(&mut buf, product)?;
            }
            Request::UpdateProduct { id, product } => {
                buf.put_u8(CMD_UPDATE_PRODUCT);
                put_json(
                    &mut buf,
                    &UpdatePayload {
                        id: id.clone(),
                        product: product.clone(),
                    },
                )?;
            }
            Request::GetProductById { id } => {
                buf.put_u8(CMD_GET_PRODUCT);
                put_field(&mut buf, id.as_str().as_bytes());
            }
            Request::SearchProducts { query, page, size } => {
                buf.put_u8(CMD_SEARCH_PRODUCTS);
                put_json(
                    &mut buf,
                    &SearchPayload {
                        query: query.clone(),
                        page: *page,
                        size: *size,
                    },
                )?;
            }
        }

        Ok(buf.freeze())
    }

    /// Decode a Request from a complete frame, as split off by
    /// LengthDelimitedCodec
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let cmd = buf.get_u8();

        match cmd {
            CMD_PING => Ok(Request::Ping),
            CMD_CREATE_PRODUCT => {
                let product = take_json(&mut buf, "CREATE_PRODUCT")?;
                Ok(Request::CreateProduct { product })
            }
            CMD_UPDATE_PRODUCT => {
                let payload: UpdatePayload = take_json(&mut buf, "UPDATE_PRODUCT")?;
                Ok(Request::UpdateProduct {
                    id: payload.id,
                    product: payload.product,
                })
            }
            CMD_GET_PRODUCT => {
                let id = take_string(&mut buf, "GET_PRODUCT")?;
                Ok(Request::GetProductById {
                    id: ProductId::from(id),
                })
            }
            CMD_SEARCH_PRODUCTS => {
                let payload: SearchPayload = take_json(&mut buf, "SEARCH_PRODUCTS")?;
                Ok(Request::SearchProducts {
                    query: payload.query,
                    page: payload.page,
                    size: payload.size,
                })
            }
            _ => Err(format!("Unknown command: 0x{:02X}", cmd)),
        }
    }
}

impl Response {
    /// Encode a Response into Bytes for transmission
    ///
    /// Format:
    /// - PONG: [0x00]
    /// - PRODUCT: [0x01][len: u32][product JSON]
    /// - PRODUCTS: [0x02][len: u32][products list JSON]
    /// - NOT_FOUND: [0x03][len: u32][id UTF-8]
    /// - INVALID: [0x04][len: u32][msg UTF-8]
    /// - ERROR: [0x05][len: u32][msg UTF-8]
    pub fn encode(&self) -> Result<Bytes, String> {
        let mut buf = BytesMut::new();

        match self {
            Response::Pong => {
                buf.put_u8(RESP_PONG);
            }
            Response::Product { product } => {
                buf.put_u8(RESP_PRODUCT);
                put_json(&mut buf, product)?;
            }
            Response::Products { list } => {
                buf.put_u8(RESP_PRODUCTS);
                put_json(&mut buf, list)?;
            }
            Response::NotFound { id } => {
                buf.put_u8(RESP_NOT_FOUND);
                put_field(&mut buf, id.as_bytes());
            }
            Response::Invalid { msg } => {
                buf.put_u8(RESP_INVALID);
                put_field(&mut buf, msg.as_bytes());
            }
            Response::Error { msg } => {
                buf.put_u8(RESP_ERROR);
                put_field(&mut buf, msg.as_bytes());
            }
        }

        Ok(buf.freeze())
    }

    /// Decode a Response from Bytes received from the network
    pub fn decode(mut buf: Bytes) -> Result<Self, String> {
        if buf.is_empty() {
            return Err("Empty buffer".to_string());
        }

        let resp_type = buf.get_u8();

        match resp_type {
            RESP_PONG => Ok(Response::Pong),
            RESP_PRODUCT => Ok(Response::Product {
                product: take_json(&mut buf, "PRODUCT")?,
            }),
            RESP_PRODUCTS => Ok(Response::Products {
                list: take_json(&mut buf, "PRODUCTS")?,
            }),
            RESP_NOT_FOUND => Ok(Response::NotFound {
                id: take_string(&mut buf, "NOT_FOUND")?,
            }),
            RESP_INVALID => Ok(Response::Invalid {
                msg: take_string(&mut buf, "INVALID")?,
            }),
            RESP_ERROR => Ok(Response::Error {
                msg: take_string(&mut buf, "ERROR")?,
            }),
            _ => Err(format!("Unknown response type: 0x{:02X}", resp_type)),
        }
    }
}

fn put_field(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn put_json<T: Serialize>(buf: &mut BytesMut, value: &T) -> Result<(), String> {
    let json = serde_json::to_vec(value).map_err(|e| format!("Failed to encode payload: {}", e))?;
    put_field(buf, &json);
    Ok(())
}

fn take_field(buf: &mut Bytes, what: &str) -> Result<Bytes, String> {
    if buf.remaining() < 4 {
        return Err(format!("Invalid {}: missing length", what));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(format!(
            "Invalid {}: expected {} bytes, got {}",
            what,
            len,
            buf.remaining()
        ));
    }
    Ok(buf.copy_to_bytes(len))
}

fn take_string(buf: &mut Bytes, what: &str) -> Result<String, String> {
    let bytes = take_field(buf, what)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| format!("Invalid {} UTF-8: {}", what, e))
}

fn take_json<T: DeserializeOwned>(buf: &mut Bytes, what: &str) -> Result<T, String> {
    let bytes = take_field(buf, what)?;
    serde_json::from_slice(&bytes).map_err(|e| format!("Invalid {} payload: {}", what, e))
}
