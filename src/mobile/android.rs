//! JNI exports for `com.v2ray.bind.V2RayNative`.
//!
//! ```kotlin
//! package com.v2ray.bind
//!
//! object V2RayNative {
//!     external fun startWithConfig(config: String): String
//!     external fun isRunning(): Boolean
//!     // ...
//! }
//! ```
//!
//! Each export forwards to a [`V2RayService`] bound to the shared lifecycle.

use super::V2RayService;
use crate::logger;
use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jint, jlong, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use std::ptr;

fn read(env: &mut JNIEnv, value: &JString) -> String {
    if value.is_null() {
        return String::new();
    }
    match env.get_string(value) {
        Ok(text) => text.into(),
        Err(error) => {
            logger::error(format!("JNI string read failed: {error}"));
            String::new()
        }
    }
}

fn reply(env: &mut JNIEnv, text: String) -> jstring {
    match env.new_string(text) {
        Ok(value) => value.into_raw(),
        Err(error) => {
            logger::error(format!("JNI string allocation failed: {error}"));
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_startWithConfig(
    mut env: JNIEnv,
    _class: JClass,
    config: JString,
) -> jstring {
    let config = read(&mut env, &config);
    let text = V2RayService::new().start_with_config(&config);
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_startWithConfigFile(
    mut env: JNIEnv,
    _class: JClass,
    path: JString,
) -> jstring {
    let path = read(&mut env, &path);
    let text = V2RayService::new().start_with_config_file(&path);
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_stop(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let text = V2RayService::new().stop();
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_getStatus(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let text = V2RayService::new().get_status();
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_isRunning(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    if V2RayService::new().is_running() {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_getVersion(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let text = V2RayService::new().get_version();
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_restart(
    mut env: JNIEnv,
    _class: JClass,
    config: JString,
) -> jstring {
    let config = read(&mut env, &config);
    let text = V2RayService::new().restart(&config);
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_restartWithConfigFile(
    mut env: JNIEnv,
    _class: JClass,
    path: JString,
) -> jstring {
    let path = read(&mut env, &path);
    let text = V2RayService::new().restart_with_config_file(&path);
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_testConfig(
    mut env: JNIEnv,
    _class: JClass,
    config: JString,
) -> jstring {
    let config = read(&mut env, &config);
    let text = V2RayService::new().test_config(&config);
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_testConfigFile(
    mut env: JNIEnv,
    _class: JClass,
    path: JString,
) -> jstring {
    let path = read(&mut env, &path);
    let text = V2RayService::new().test_config_file(&path);
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_queryStats(
    mut env: JNIEnv,
    _class: JClass,
    tag: JString,
    name: JString,
) -> jlong {
    let tag = read(&mut env, &tag);
    let name = read(&mut env, &name);
    V2RayService::new().query_stats(&tag, &name)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_getSystemStats(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let text = V2RayService::new().get_system_stats();
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_setLogLevel(
    mut env: JNIEnv,
    _class: JClass,
    level: jint,
) -> jstring {
    let text = V2RayService::new().set_log_level(level);
    reply(&mut env, text)
}

#[no_mangle]
pub extern "system" fn Java_com_v2ray_bind_V2RayNative_getConfigTemplate(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let text = V2RayService::new().get_config_template();
    reply(&mut env, text)
}
