pub mod support;

mod extraction;
