//! End-to-end test package for `dirquery-ldap`.
