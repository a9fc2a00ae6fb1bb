mod chain;
mod dispatcher;
mod error;
mod handlers;
mod hs2019;
mod inbox;
mod local_url;
mod mailman;
mod message;
mod model;
mod outbound;
mod repo;
mod resolver;
mod signature;
mod simple_queue;
mod worker;

pub(crate) use error::{Disposition, InboxError, classify};
pub(crate) use local_url::UrlMatcher;
pub(crate) use worker::{InboxWorker, InboxWorkerInit, InboxWorkerMsg};
