pub mod cicd;
