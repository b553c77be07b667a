//! Fixed runtime bootstrap assets.
//!
//! Every response carries these three files verbatim: the shared header with
//! the base-class externs and the strict conversion helpers, the bootstrap
//! translation unit holding the extension entry point and the insertion
//! points the per-file edits target, and the `extconf.rb` build script.

use crate::GeneratedFile;

const INIT_HEADER: &str = r#"#include <ruby/ruby.h>
#include <ruby/encoding.h>
#include <string>

#ifndef __RB_FASTPROTO_INIT_H
#define __RB_FASTPROTO_INIT_H

namespace rb_fastproto_gen {
    // The top-level ::Fastproto module
    extern VALUE rb_fastproto_module;

    // The base classes
    extern VALUE cls_fastproto_message;
    extern VALUE cls_fastproto_enum;
    extern VALUE cls_fastproto_service;
    extern VALUE cls_fastproto_method;
    extern VALUE cls_fastproto_field;
    extern VALUE cls_fastproto_field_integer;
    extern VALUE cls_fastproto_field_float;
    extern VALUE cls_fastproto_field_bool;
    extern VALUE cls_fastproto_field_bytes;
    extern VALUE cls_fastproto_field_string;
    extern VALUE cls_fastproto_field_enum;
    extern VALUE cls_fastproto_field_message;
    extern VALUE cls_fastproto_field_group;
    extern VALUE cls_fastproto_field_unknown;

    // Strict conversion wrappers. The plain ruby macros will happily
    // truncate a float into an integer field; these raise instead.
    static inline unsigned int NUM2UINT_S(VALUE num) {
        if (RB_TYPE_P(num, T_FLOAT)) {
            rb_raise(rb_eTypeError, "Expected fixnum, got float");
        }
        return NUM2UINT(num);
    }

    static inline int NUM2INT_S(VALUE num) {
        if (RB_TYPE_P(num, T_FLOAT)) {
            rb_raise(rb_eTypeError, "Expected fixnum, got float");
        }
        return NUM2INT(num);
    }

    static inline unsigned long NUM2ULONG_S(VALUE num) {
        if (RB_TYPE_P(num, T_FLOAT)) {
            rb_raise(rb_eTypeError, "Expected fixnum, got float");
        }
        return NUM2ULONG(num);
    }

    static inline long NUM2LONG_S(VALUE num) {
        if (RB_TYPE_P(num, T_FLOAT)) {
            rb_raise(rb_eTypeError, "Expected fixnum, got float");
        }
        return NUM2LONG(num);
    }

    static inline bool VAL2BOOL_S(VALUE arg) {
        if (RB_TYPE_P(arg, T_TRUE)) {
            return true;
        } else if (RB_TYPE_P(arg, T_FALSE)) {
            return false;
        } else {
            rb_raise(rb_eTypeError, "Expected boolean");
            return false;
        }
    }

    static inline VALUE BOOL2VAL_S(bool arg) {
        return arg ? Qtrue : Qfalse;
    }

    static inline VALUE RSTR_AS_UTF8(VALUE rstr) {
        rb_enc_associate_index(rstr, rb_enc_find_index("UTF-8"));
        return rstr;
    }
}

#endif
"#;

const INIT_IMPL: &str = r#"// Bootstrap translation unit; the generated per-file code is spliced in
// at the insertion points below.
#include "rb_fastproto_init.h"

// @@protoc_insertion_point(init_file_header)

namespace rb_fastproto_gen {
    VALUE rb_fastproto_module = Qnil;
    VALUE cls_fastproto_message = Qnil;
    VALUE cls_fastproto_enum = Qnil;
    VALUE cls_fastproto_service = Qnil;
    VALUE cls_fastproto_method = Qnil;
    VALUE cls_fastproto_field = Qnil;
    VALUE cls_fastproto_field_integer = Qnil;
    VALUE cls_fastproto_field_float = Qnil;
    VALUE cls_fastproto_field_bool = Qnil;
    VALUE cls_fastproto_field_bytes = Qnil;
    VALUE cls_fastproto_field_string = Qnil;
    VALUE cls_fastproto_field_enum = Qnil;
    VALUE cls_fastproto_field_message = Qnil;
    VALUE cls_fastproto_field_group = Qnil;
    VALUE cls_fastproto_field_unknown = Qnil;

    static void define_message_class();
    static void define_enum_class();
    static void define_service_class();
    static void define_method_class();
    static void define_field_classes();
}

extern "C" void Init_fastproto_gen(void) {
    // Define our toplevel module
    rb_fastproto_gen::rb_fastproto_module = rb_define_module("Fastproto");

    rb_fastproto_gen::define_message_class();
    rb_fastproto_gen::define_enum_class();
    rb_fastproto_gen::define_service_class();
    rb_fastproto_gen::define_method_class();
    rb_fastproto_gen::define_field_classes();

    // @@protoc_insertion_point(init_entrypoints)
}

namespace rb_fastproto_gen {
    static VALUE message_classes(VALUE self) {
        return rb_cv_get(self, "@@message_classes");
    }

    static VALUE class_for_proto_name(VALUE self, VALUE name) {
        return rb_hash_aref(rb_cv_get(self, "@@message_classes"), name);
    }

    static void define_message_class() {
        cls_fastproto_message = rb_define_class_under(rb_fastproto_module, "Message", rb_cObject);
        // Process-wide registry of fully-qualified proto name -> generated class.
        rb_cv_set(cls_fastproto_message, "@@message_classes", rb_hash_new());
        rb_define_singleton_method(cls_fastproto_message, "message_classes", RUBY_METHOD_FUNC(&message_classes), 0);
        rb_define_singleton_method(cls_fastproto_message, "class_for_proto_name", RUBY_METHOD_FUNC(&class_for_proto_name), 1);
    }

    static void define_enum_class() {
        cls_fastproto_enum = rb_define_class_under(rb_fastproto_module, "Enum", rb_cObject);
    }

    static void define_service_class() {
        cls_fastproto_service = rb_define_class_under(rb_fastproto_module, "Service", rb_cObject);
    }

    static void define_method_class() {
        cls_fastproto_method = rb_define_class_under(rb_fastproto_module, "Method", rb_cObject);
    }

    static void define_field_classes() {
        cls_fastproto_field = rb_define_class_under(rb_fastproto_module, "Field", rb_cObject);
        cls_fastproto_field_integer = rb_struct_define_under(cls_fastproto_field, "Integer", "tag", "name", "repeated", NULL);
        cls_fastproto_field_float = rb_struct_define_under(cls_fastproto_field, "Float", "tag", "name", "repeated", NULL);
        cls_fastproto_field_bool = rb_struct_define_under(cls_fastproto_field, "Bool", "tag", "name", "repeated", NULL);
        cls_fastproto_field_bytes = rb_struct_define_under(cls_fastproto_field, "Bytes", "tag", "name", "repeated", NULL);
        cls_fastproto_field_string = rb_struct_define_under(cls_fastproto_field, "String", "tag", "name", "repeated", NULL);
        cls_fastproto_field_enum = rb_struct_define_under(cls_fastproto_field, "Enum", "tag", "name", "repeated", "value_to_name", "name_to_value", NULL);
        cls_fastproto_field_message = rb_struct_define_under(cls_fastproto_field, "Message", "tag", "name", "repeated", "proxy_class", NULL);
        cls_fastproto_field_group = rb_struct_define_under(cls_fastproto_field, "Group", "tag", "name", "repeated", "proxy_class", NULL);
        cls_fastproto_field_unknown = rb_struct_define_under(cls_fastproto_field, "Unknown", "tag", "name", "repeated", NULL);
    }
}
"#;

const EXTCONF: &str = r#"require 'mkmf'

$INCFLAGS << ' -I/usr/local/include'
$LIBPATH.push('/usr/local/lib')
$CXXFLAGS << ' --std=c++11 -Wno-shorten-64-to-32 -Wno-sign-compare -Wno-deprecated-declarations -O3'

$warnflags.gsub!('-Wdeclaration-after-statement', '')
$warnflags.gsub!('-Wimplicit-function-declaration', '')

dir_config('protobuf')

# Our sources live in subdirectories matching the proto file layout, but
# mkmf only compiles the top level. Smuggle the paths through $srcs and
# fix the Makefile up afterwards.
$srcs = Dir.glob('**/*.{cpp,cc,c}').map do |name|
  name.gsub(/\//, '__REPLACE_WITH_A_SLASH__')
end

unless have_library('protobuf')
  abort 'protobuf is missing. please install protobuf'
end

create_makefile('fastproto_gen')

makefile_text = File.read('Makefile')
File.open('Makefile', 'w') do |f|
  f.write makefile_text.gsub(/__REPLACE_WITH_A_SLASH__/, '/')
end
"#;

/// The fixed files seeded into every `CodeGeneratorResponse`.
pub fn bootstrap_files() -> Vec<GeneratedFile> {
    vec![
        GeneratedFile::new("rb_fastproto_init.h", INIT_HEADER),
        GeneratedFile::new("rb_fastproto_init.cpp", INIT_IMPL),
        GeneratedFile::new("extconf.rb", EXTCONF),
    ]
}
