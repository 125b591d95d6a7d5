mod auth;
mod client;

pub use auth::{AuthClient, AuthError, LoginResponse, UserInfo};
pub use client::{
    ApiErrorClass, FileKind, FileboxClient, FileboxError, ListQuery, Preview, RemoteFile, SortBy,
    SortOrder,
};
